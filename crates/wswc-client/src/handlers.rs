// handlers.rs -- command handler registry
//
// A fixed-capacity name -> handler table keyed by the tokenizer's rolling
// hash. Entries live in a 48-slot array linked by 8-bit signed indices
// (-1 is null): every entry sits in exactly one of the free list and the
// used list, and used entries are additionally chained into one of 89 hash
// bins. Each entry is stamped with the generation tag current at register
// time so that per-connection handlers can be purged in bulk while the
// persistent tag-0 set stays.

use wswc_common::cmd::{string_hash_and_length, CommandParser, Token};
use wswc_common::console::ConsoleRef;

use crate::cl_main::ProtocolExecutor;

pub type CommandHandler = fn(&mut ProtocolExecutor, &mut CommandParser);

const MAX_HANDLERS: usize = 48;
const HASH_TABLE_SIZE: usize = 89; // A prime number

const NULL_INDEX: i8 = -1;

#[derive(Clone, Copy)]
struct HashEntry {
    name: &'static str,
    handler: Option<CommandHandler>,
    tag: u32,
    name_hash: u32,
    name_length: u8,
    prev_in_hash_bin: i8,
    next_in_hash_bin: i8,
    next_in_free_list: i8,
    next_in_used_list: i8,
    prev_in_used_list: i8,
}

impl HashEntry {
    const fn unused() -> Self {
        Self {
            name: "",
            handler: None,
            tag: 0,
            name_hash: 0,
            name_length: 0,
            prev_in_hash_bin: NULL_INDEX,
            next_in_hash_bin: NULL_INDEX,
            next_in_free_list: NULL_INDEX,
            next_in_used_list: NULL_INDEX,
            prev_in_used_list: NULL_INDEX,
        }
    }
}

/// The outcome of a registry lookup: `Missing` means no entry carries the
/// name; a found entry may still hold no handler (a registered no-op).
pub enum Lookup {
    Found(Option<CommandHandler>),
    Missing,
}

pub struct CommandHandlersRegistry {
    console: ConsoleRef,
    /// Shown in dispatch diagnostics, e.g. "trying to execute a server command".
    purpose: &'static str,

    entries: [HashEntry; MAX_HANDLERS],
    first_free_entry: i8,
    first_used_entry: i8,
    hash_table: [i8; HASH_TABLE_SIZE],

    curr_generation_tag: u32,
}

impl CommandHandlersRegistry {
    pub fn new(console: ConsoleRef, purpose: &'static str) -> Self {
        let mut entries = [HashEntry::unused(); MAX_HANDLERS];
        for (i, entry) in entries.iter_mut().enumerate() {
            entry.next_in_free_list = (i + 1) as i8;
        }
        entries[MAX_HANDLERS - 1].next_in_free_list = NULL_INDEX;

        Self {
            console,
            purpose,
            entries,
            first_free_entry: 0,
            first_used_entry: NULL_INDEX,
            hash_table: [NULL_INDEX; HASH_TABLE_SIZE],
            curr_generation_tag: 0,
        }
    }

    pub fn purpose(&self) -> &'static str {
        self.purpose
    }

    pub fn new_generation_tag(&mut self) {
        self.curr_generation_tag += 1;
    }

    pub fn curr_generation_tag(&self) -> u32 {
        self.curr_generation_tag
    }

    /// Registers `name` under the current generation tag. Re-registering an
    /// existing name only toggles its handler on or off: one of the two
    /// handlers must be null, a second non-null registration is a
    /// programming error and fatal.
    pub fn register(&mut self, name: &'static str, handler: Option<CommandHandler>) {
        let (hash, length) = string_hash_and_length(name);

        if length > i8::MAX as usize {
            self.console.printf("CommandHandlersRegistry::register(): command name is too long\n");
            panic!("CommandHandlersRegistry::register(): command name is too long");
        }

        let hash_bin_index = (hash % HASH_TABLE_SIZE as u32) as usize;

        // Toggle mode for an existing entry
        let mut entry_index = self.hash_table[hash_bin_index];
        while entry_index >= 0 {
            let entry = &mut self.entries[entry_index as usize];
            if entry.name_hash == hash && entry.name_length as usize == length && entry.name == name {
                if handler.is_none() || entry.handler.is_none() {
                    entry.handler = handler;
                    return;
                }
                self.console.vprintf(format_args!(
                    "CommandHandlersRegistry::register(): a non-null handler for command `{}` has been already registered\n",
                    name
                ));
                panic!("CommandHandlersRegistry::register(): duplicate non-null registration");
            }
            entry_index = entry.next_in_hash_bin;
        }

        if self.first_free_entry < 0 {
            self.console.printf("CommandHandlersRegistry::register(): too many command handlers\n");
            panic!("CommandHandlersRegistry::register(): too many command handlers");
        }

        let new_entry_index = self.first_free_entry;
        let tag = self.curr_generation_tag;
        let first_used = self.first_used_entry;
        let bin_head = self.hash_table[hash_bin_index];

        {
            let new_entry = &mut self.entries[new_entry_index as usize];
            new_entry.name = name;
            new_entry.name_hash = hash;
            new_entry.name_length = length as u8;
            new_entry.handler = handler;
            new_entry.tag = tag;

            // Unlink from free list
            self.first_free_entry = new_entry.next_in_free_list;
            new_entry.next_in_free_list = NULL_INDEX;

            // Link to used list
            new_entry.next_in_used_list = first_used;
            new_entry.prev_in_used_list = NULL_INDEX;

            // Link to hash bin
            new_entry.next_in_hash_bin = bin_head;
            new_entry.prev_in_hash_bin = NULL_INDEX;
        }

        if first_used >= 0 {
            self.entries[first_used as usize].prev_in_used_list = new_entry_index;
        }
        self.first_used_entry = new_entry_index;

        if bin_head >= 0 {
            self.entries[bin_head as usize].prev_in_hash_bin = new_entry_index;
        }
        self.hash_table[hash_bin_index] = new_entry_index;
    }

    /// Finds a command by its scanned token. The caller dispatches.
    pub fn find(&self, token: &Token) -> Lookup {
        let hash_bin_index = (token.hash % HASH_TABLE_SIZE as u32) as usize;

        let mut entry_index = self.hash_table[hash_bin_index];
        while entry_index >= 0 {
            let entry = &self.entries[entry_index as usize];
            if entry.name_hash == token.hash
                && entry.name_length as usize == token.len()
                && entry.name == token.text
            {
                return Lookup::Found(entry.handler);
            }
            entry_index = entry.next_in_hash_bin;
        }

        Lookup::Missing
    }

    /// Removes every entry whose generation tag is at or above `tag`.
    pub fn clear(&mut self, tag: u32) {
        let mut entry_index = self.first_used_entry;

        while entry_index >= 0 {
            let entry = self.entries[entry_index as usize];
            let next_used = entry.next_in_used_list;

            if entry.tag >= tag {
                self.unlink_from_used_list(entry_index);
                self.unlink_from_hash_bin(entry_index);

                let freed = &mut self.entries[entry_index as usize];
                freed.name = "";
                freed.handler = None;
                freed.next_in_free_list = self.first_free_entry;
                self.first_free_entry = entry_index;
            }

            entry_index = next_used;
        }
    }

    fn unlink_from_used_list(&mut self, entry_index: i8) {
        let (prev, next) = {
            let entry = &self.entries[entry_index as usize];
            (entry.prev_in_used_list, entry.next_in_used_list)
        };

        if next >= 0 {
            self.entries[next as usize].prev_in_used_list = prev;
        }
        if prev >= 0 {
            self.entries[prev as usize].next_in_used_list = next;
        } else {
            debug_assert_eq!(self.first_used_entry, entry_index);
            self.first_used_entry = next;
        }

        let entry = &mut self.entries[entry_index as usize];
        entry.next_in_used_list = NULL_INDEX;
        entry.prev_in_used_list = NULL_INDEX;
    }

    fn unlink_from_hash_bin(&mut self, entry_index: i8) {
        let (prev, next, hash) = {
            let entry = &self.entries[entry_index as usize];
            (entry.prev_in_hash_bin, entry.next_in_hash_bin, entry.name_hash)
        };

        if next >= 0 {
            self.entries[next as usize].prev_in_hash_bin = prev;
        }
        if prev >= 0 {
            self.entries[prev as usize].next_in_hash_bin = next;
        } else {
            let hash_bin_index = (hash % HASH_TABLE_SIZE as u32) as usize;
            debug_assert_eq!(self.hash_table[hash_bin_index], entry_index);
            self.hash_table[hash_bin_index] = next;
        }

        let entry = &mut self.entries[entry_index as usize];
        entry.next_in_hash_bin = NULL_INDEX;
        entry.prev_in_hash_bin = NULL_INDEX;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use wswc_common::console::NullConsole;

    fn registry() -> CommandHandlersRegistry {
        CommandHandlersRegistry::new(Arc::new(NullConsole), "test registry")
    }

    fn noop(_executor: &mut ProtocolExecutor, _parser: &mut CommandParser) {}

    fn token_for(name: &str) -> Token {
        let (hash, _) = string_hash_and_length(name);
        Token { text: name.to_string(), hash }
    }

    #[test]
    fn registered_names_are_found_and_others_are_not() {
        let mut registry = registry();
        registry.register("challenge", Some(noop));
        registry.register("motd", None);

        assert!(matches!(registry.find(&token_for("challenge")), Lookup::Found(Some(_))));
        assert!(matches!(registry.find(&token_for("motd")), Lookup::Found(None)));
        assert!(matches!(registry.find(&token_for("unknown")), Lookup::Missing));
    }

    #[test]
    fn clear_removes_only_entries_at_or_above_the_tag() {
        let mut registry = registry();
        registry.register("persistent", Some(noop));
        registry.new_generation_tag();
        let session_tag = registry.curr_generation_tag();
        registry.register("session", Some(noop));

        registry.clear(session_tag);

        assert!(matches!(registry.find(&token_for("persistent")), Lookup::Found(Some(_))));
        assert!(matches!(registry.find(&token_for("session")), Lookup::Missing));
    }

    #[test]
    fn cleared_entries_are_reusable() {
        let mut registry = registry();
        registry.new_generation_tag();

        for round in 0..4 {
            for i in 0..MAX_HANDLERS {
                // Names must outlive the registry; leak a handful for the test
                let name: &'static str = Box::leak(format!("cmd_{}_{}", round, i).into_boxed_str());
                registry.register(name, Some(noop));
            }
            registry.clear(1);
        }

        assert!(matches!(registry.find(&token_for("cmd_3_0")), Lookup::Missing));
    }

    #[test]
    fn toggle_mode_swaps_the_handler_in_place() {
        let mut registry = registry();
        registry.register("dstart", None);
        registry.register("dstart", Some(noop));
        assert!(matches!(registry.find(&token_for("dstart")), Lookup::Found(Some(_))));

        registry.register("dstart", None);
        assert!(matches!(registry.find(&token_for("dstart")), Lookup::Found(None)));
    }

    #[test]
    #[should_panic(expected = "duplicate non-null registration")]
    fn double_non_null_registration_is_fatal() {
        let mut registry = registry();
        registry.register("cs", Some(noop));
        registry.register("cs", Some(noop));
    }

    #[test]
    #[should_panic(expected = "too many command handlers")]
    fn overfilling_the_registry_is_fatal() {
        let mut registry = registry();
        for i in 0..=MAX_HANDLERS {
            let name: &'static str = Box::leak(format!("overfill_{}", i).into_boxed_str());
            registry.register(name, Some(noop));
        }
    }

    #[test]
    fn clear_keeps_sibling_chain_entries_reachable() {
        let mut registry = registry();
        // Enough names that some hash bins hold multi-entry chains
        let names: Vec<&'static str> = (0..24)
            .map(|i| -> &'static str { Box::leak(format!("chain_{}", i).into_boxed_str()) })
            .collect();

        for (i, name) in names.iter().enumerate() {
            if i == 12 {
                registry.new_generation_tag();
            }
            registry.register(name, Some(noop));
        }

        registry.clear(1);

        for (i, name) in names.iter().enumerate() {
            let lookup = registry.find(&token_for(name));
            if i < 12 {
                assert!(matches!(lookup, Lookup::Found(Some(_))), "lost `{}`", name);
            } else {
                assert!(matches!(lookup, Lookup::Missing), "kept `{}`", name);
            }
        }
    }
}

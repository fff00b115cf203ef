// End-to-end handshake against a fake game server on the UDP loopback.

use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;

use wswc_client::{ClientState, System};
use wswc_common::console::NullConsole;

fn recv_text(socket: &UdpSocket) -> Option<(Vec<u8>, std::net::SocketAddr)> {
    let mut buffer = [0u8; 2048];
    match socket.recv_from(&mut buffer) {
        Ok((size, from)) => Some((buffer[..size].to_vec(), from)),
        Err(_) => None,
    }
}

#[test]
fn challenge_handshake_over_loopback() {
    let fake_server = UdpSocket::bind("127.0.0.1:0").expect("cannot bind the fake server socket");
    fake_server
        .set_read_timeout(Some(Duration::from_secs(3)))
        .unwrap();
    let server_port = fake_server.local_addr().unwrap().port();

    let console = Arc::new(NullConsole);
    let mut system = System::new(console.clone());
    let client_id = system.new_client(console).unwrap();

    {
        let client = system.client_mut(client_id).unwrap();
        client.set_name("tester");
        client.execute_command(&format!("connect 127.0.0.1:{}", server_port));
        assert_eq!(client.state(), ClientState::Challenging);
    }

    // The client must have sent a non-sequenced getchallenge
    let (request, client_address) = recv_text(&fake_server).expect("no challenge request arrived");
    assert_eq!(&request[0..4], &(-1i32).to_le_bytes());
    assert_eq!(&request[4..], b"getchallenge\0");

    // Reply with a challenge token
    let mut reply = (-1i32).to_le_bytes().to_vec();
    reply.extend_from_slice(b"challenge XYZ\0");
    fake_server.send_to(&reply, client_address).unwrap();

    // Drive frames until the reply is consumed
    for _ in 0..100 {
        system.frame(10);
        if system.client_mut(client_id).unwrap().state() == ClientState::Connecting {
            break;
        }
    }
    assert_eq!(system.client_mut(client_id).unwrap().state(), ClientState::Connecting);

    // The connect request carries the protocol, the token and the userinfo
    let (request, _) = recv_text(&fake_server).expect("no connect request arrived");
    assert_eq!(&request[0..4], &(-1i32).to_le_bytes());
    let text = String::from_utf8_lossy(&request[4..]);
    assert!(text.starts_with("connect 22 "), "unexpected request: {}", text);
    assert!(text.contains(" XYZ "), "challenge token missing: {}", text);
    assert!(text.contains("\\name\\tester"), "name missing: {}", text);

    system.client_mut(client_id).unwrap().execute_command("disconnect");
    assert_eq!(system.client_mut(client_id).unwrap().state(), ClientState::Disconnected);
}

//! Integration tests for the SSH client handshake over real sockets.
//!
//! A scripted server, built from the crate's own protocol primitives, runs
//! on a loopback listener and walks the client through banner exchange,
//! KEXINIT, the Diffie-Hellman handshake, NEWKEYS and the service request.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use skerry_platform::{SkerryError, SkerryResult};
use skerry_proto::ssh::buffer::{put_mpint, put_string, WireReader};
use skerry_proto::ssh::client::SshClient;
use skerry_proto::ssh::crypto::{CryptoPair, CryptoState, Role};
use skerry_proto::ssh::hostkey::Ed25519HostKey;
use skerry_proto::ssh::kex::{AlgorithmSuite, KexInit};
use skerry_proto::ssh::kex_dh::{exchange_hash, DhExchange};
use skerry_proto::ssh::message::MessageType;
use skerry_proto::ssh::packet::PacketCodec;
use skerry_proto::ssh::session::{Session, SessionConfig, SessionState};
use skerry_proto::ssh::version::Banner;

/// Behavior switches for the scripted server.
#[derive(Clone, Default)]
struct ServerScript {
    /// Sign garbage instead of the exchange hash.
    corrupt_signature: bool,
    /// Greet with a non-SSH banner.
    bogus_banner: bool,
}

/// Reads packets from the stream through a codec until one is complete.
async fn read_packet(
    stream: &mut TcpStream,
    codec: &mut PacketCodec,
    crypto: &mut CryptoPair,
) -> SkerryResult<Vec<u8>> {
    loop {
        if let Some(payload) = codec.next_packet(crypto.current_mut())? {
            return Ok(payload);
        }
        let mut buf = [0u8; 4096];
        let n = stream.read(&mut buf).await.map_err(SkerryError::Io)?;
        if n == 0 {
            return Err(SkerryError::Protocol("peer closed".to_string()));
        }
        codec.feed(&buf[..n]);
    }
}

/// Reads the client banner line; surplus bytes are fed to the codec.
async fn read_banner_line(
    stream: &mut TcpStream,
    codec: &mut PacketCodec,
) -> SkerryResult<String> {
    let mut collected: Vec<u8> = Vec::new();
    loop {
        let mut buf = [0u8; 256];
        let n = stream.read(&mut buf).await.map_err(SkerryError::Io)?;
        if n == 0 {
            return Err(SkerryError::Protocol("peer closed".to_string()));
        }
        collected.extend_from_slice(&buf[..n]);

        if let Some(newline) = collected.iter().position(|&b| b == b'\n') {
            codec.feed(&collected[newline + 1..]);
            let line = String::from_utf8_lossy(&collected[..newline]).into_owned();
            return Ok(line.trim_end_matches('\r').to_string());
        }
    }
}

/// Serves exactly one scripted handshake (and service request) on `stream`.
async fn serve_connection(
    mut stream: TcpStream,
    host_key: Ed25519HostKey,
    script: ServerScript,
) -> SkerryResult<()> {
    let banner = if script.bogus_banner {
        Banner::from_line("FTP-2.0-NotSsh")
    } else {
        Banner::from_line("SSH-2.0-OpenSSH_7.9p1")
    };
    stream
        .write_all(&banner.to_wire_format())
        .await
        .map_err(SkerryError::Io)?;

    let mut codec = PacketCodec::new();
    let mut crypto = CryptoPair::new();

    let client_banner = read_banner_line(&mut stream, &mut codec).await?;

    // KEXINIT exchange
    let kexinit = KexInit::new_client_default();
    let kexinit_payload = kexinit.to_bytes();
    let wire = codec.seal(crypto.current_mut(), &kexinit_payload)?;
    stream.write_all(&wire).await.map_err(SkerryError::Io)?;

    let client_kexinit_payload = read_packet(&mut stream, &mut codec, &mut crypto).await?;
    let client_kexinit = KexInit::from_bytes(&client_kexinit_payload)?;
    let suite = AlgorithmSuite::negotiate(&client_kexinit, &kexinit)?;

    // DH: receive e, send reply + NEWKEYS
    let dh_init = read_packet(&mut stream, &mut codec, &mut crypto).await?;
    assert_eq!(dh_init[0], MessageType::KexdhInit as u8);
    let mut reader = WireReader::new(&dh_init[1..]);
    let e = reader.read_mpint()?;

    let exchange = DhExchange::from_kex_name(&suite.kex)?;
    let k = exchange.compute_shared_secret(e)?;
    let blob = host_key.public_key_blob();
    let hash = exchange.hash();
    let session_hash = exchange_hash(
        hash,
        &client_banner,
        banner.as_str(),
        &client_kexinit_payload,
        &kexinit_payload,
        &blob,
        e,
        exchange.public_key(),
        &k,
    );

    let signature = if script.corrupt_signature {
        host_key.sign(b"not the exchange hash")
    } else {
        host_key.sign(&session_hash)
    };

    let mut reply = BytesMut::new();
    reply.put_u8(MessageType::KexdhReply as u8);
    put_string(&mut reply, &blob);
    put_mpint(&mut reply, exchange.public_key());
    put_string(&mut reply, &signature);

    let mut wire = codec.seal(crypto.current_mut(), &reply)?;
    wire.extend(codec.seal(crypto.current_mut(), &[MessageType::NewKeys as u8])?);
    stream.write_all(&wire).await.map_err(SkerryError::Io)?;

    let next = CryptoState::derive(
        &suite,
        Role::Server,
        hash,
        &k,
        &session_hash,
        &session_hash,
    )?;
    crypto.install_next(next);

    // client NEWKEYS, then switch to the negotiated keys
    let newkeys = read_packet(&mut stream, &mut codec, &mut crypto).await?;
    assert_eq!(newkeys[0], MessageType::NewKeys as u8);
    crypto.rotate()?;

    // service request over the encrypted transport
    let request = read_packet(&mut stream, &mut codec, &mut crypto).await?;
    assert_eq!(request[0], MessageType::ServiceRequest as u8);
    let mut reader = WireReader::new(&request[1..]);
    let service = reader.read_string()?.to_vec();

    let mut accept = BytesMut::new();
    accept.put_u8(MessageType::ServiceAccept as u8);
    put_string(&mut accept, &service);
    let wire = codec.seal(crypto.current_mut(), &accept)?;
    stream.write_all(&wire).await.map_err(SkerryError::Io)?;

    // swallow whatever the client sends next (disconnect or close)
    let _ = read_packet(&mut stream, &mut codec, &mut crypto).await;
    Ok(())
}

/// Binds a scripted server and returns its address plus the serving task.
async fn spawn_server(
    script: ServerScript,
) -> (String, tokio::task::JoinHandle<SkerryResult<()>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let host_key = Ed25519HostKey::generate();

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.map_err(SkerryError::Io)?;
        serve_connection(stream, host_key, script).await
    });

    (addr, handle)
}

#[tokio::test]
async fn test_full_handshake_over_tcp() -> Result<(), Box<dyn std::error::Error>> {
    skerry_proto::init();

    let (addr, server) = spawn_server(ServerScript::default()).await;

    let milestones = Arc::new(Mutex::new(Vec::new()));
    let sink = milestones.clone();
    let mut session = Session::new(SessionConfig::default());
    session.set_progress_callback(move |p| sink.lock().unwrap().push(p));

    let mut client = timeout(
        Duration::from_secs(10),
        SshClient::connect_with_session(&addr, Duration::from_secs(5), session),
    )
    .await??;

    assert_eq!(client.session().state(), SessionState::Authenticating);
    assert!(client.session().is_connected());
    assert_eq!(client.session().session_id().unwrap().len(), 32);
    assert_eq!(
        client.session().algorithms().unwrap().kex,
        "diffie-hellman-group14-sha256"
    );
    assert_eq!(client.openssh_version(), (7 << 16) | (9 << 8));
    assert_eq!(
        *milestones.lock().unwrap(),
        vec![0.2, 0.4, 0.5, 0.6, 0.8, 1.0]
    );

    client.request_service("ssh-userauth").await?;
    assert_eq!(client.session().accepted_service(), Some("ssh-userauth"));

    client.disconnect().await?;
    timeout(Duration::from_secs(5), server).await??.ok();
    Ok(())
}

#[tokio::test]
async fn test_signature_failure_aborts_connect() -> Result<(), Box<dyn std::error::Error>> {
    let (addr, _server) = spawn_server(ServerScript {
        corrupt_signature: true,
        ..Default::default()
    })
    .await;

    let result = timeout(Duration::from_secs(10), SshClient::connect(&addr)).await?;

    match result {
        Err(SkerryError::Protocol(msg)) => {
            assert!(msg.contains("signature verification failed"), "{}", msg);
        }
        other => panic!("expected signature failure, got {:?}", other.map(|_| ())),
    }
    Ok(())
}

#[tokio::test]
async fn test_non_ssh_server_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let (addr, _server) = spawn_server(ServerScript {
        bogus_banner: true,
        ..Default::default()
    })
    .await;

    let result = timeout(Duration::from_secs(10), SshClient::connect(&addr)).await?;

    match result {
        Err(SkerryError::Protocol(msg)) => {
            assert!(msg.contains("Protocol mismatch"), "{}", msg);
        }
        other => panic!("expected protocol mismatch, got {:?}", other.map(|_| ())),
    }
    Ok(())
}

#[tokio::test]
async fn test_connect_stream_adopts_open_socket() -> Result<(), Box<dyn std::error::Error>> {
    let (addr, server) = spawn_server(ServerScript::default()).await;

    let stream = TcpStream::connect(&addr).await?;
    let client = timeout(
        Duration::from_secs(10),
        SshClient::connect_stream(stream, Session::new(SessionConfig::default())),
    )
    .await??;

    assert_eq!(client.session().state(), SessionState::Authenticating);
    assert_eq!(client.server_address(), addr);

    drop(client);
    let _ = timeout(Duration::from_secs(5), server).await;
    Ok(())
}

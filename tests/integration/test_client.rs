//! Volitional session driven through the HTTP executor against a local
//! OpenAI-compatible server.

#![allow(clippy::unwrap_used)]

use agora_client::OpenAiCompatibleExecutor;
use agora_engine::{
    AgencyConfiguration, EndpointConfig, ResponseState, SessionPhase, StimulusSet, StopReason,
    VolitionalSession,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Reads one HTTP request and returns its body.
async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0_u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf);
        if let Some(split) = text.find("\r\n\r\n") {
            let length = text[..split]
                .lines()
                .find_map(|l| {
                    l.to_ascii_lowercase()
                        .strip_prefix("content-length:")
                        .map(|v| v.trim().parse::<usize>().unwrap())
                })
                .unwrap_or(0);
            if buf.len() >= split + 4 + length {
                break;
            }
        }
    }
    let text = String::from_utf8_lossy(&buf).into_owned();
    text.split("\r\n\r\n").nth(1).unwrap_or_default().to_string()
}

/// Serves one canned completion per connection, returning the request bodies.
async fn serve(contents: Vec<&'static str>) -> (String, JoinHandle<Vec<serde_json::Value>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let mut requests = Vec::new();
        for content in contents {
            let (mut socket, _) = listener.accept().await.unwrap();
            let body = read_request(&mut socket).await;
            requests.push(serde_json::from_str(&body).unwrap());

            let reply = serde_json::json!({
                "choices": [{ "message": { "role": "assistant", "content": content } }]
            })
            .to_string();
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{reply}",
                reply.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        }
        requests
    });
    (format!("http://{addr}/v1/"), handle)
}

#[tokio::test]
async fn session_over_http() {
    let (base_url, server) = serve(vec![
        "I understand I can reply PASS.",
        "<think>Looks sharp.</think>A dagger.",
        "PASS",
    ])
    .await;

    let endpoint = EndpointConfig {
        base_url,
        model: "phi4".to_string(),
        ..Default::default()
    };
    let executor = OpenAiCompatibleExecutor::from_config(&endpoint).unwrap();
    assert!(executor.url().ends_with("/v1/chat/completions"));

    let agency = AgencyConfiguration {
        max_turns: 2,
        ..Default::default()
    };
    let stimuli = vec![StimulusSet::default().target(); 2];
    let session = VolitionalSession::new(agency.clone(), stimuli)
        .with_system_prompt("You are a helpful AI assistant.")
        .with_timeout(endpoint.turn_timeout());
    let state = session.run(&executor).await;

    assert!(state.consent.as_ref().unwrap().acknowledged);
    assert_eq!(state.phase, SessionPhase::Stopped(StopReason::MaxTurns));
    assert_eq!(state.history[0].state(), Some(ResponseState::Engage));
    assert_eq!(state.history[0].response(), Some("A dagger."));
    assert_eq!(state.history[1].state(), Some(ResponseState::Withdraw));

    let requests = server.await.unwrap();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[1]["model"], "phi4");
    assert_eq!(requests[1]["messages"][0]["role"], "system");
    assert_eq!(
        requests[1]["messages"][1]["content"],
        agency.frame(&StimulusSet::default().target().symbol)
    );
}

//! Manual smoke test: opens two connections, runs a short poll between them
//! and prints everything the relay sends back.

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use shared::{decode_server_message, get_timestamp, ServerMessage};
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:3000/".to_string());

    println!("Connecting host and viewer to {}", url);
    let (mut host, _) = connect_async(url.as_str()).await?;
    let (mut viewer, _) = connect_async(url.as_str()).await?;

    // Poll closes in two seconds
    let now = get_timestamp();
    let poll_id = format!("smoke-{}", now);
    let poll = json!({
        "type": "poll",
        "id": poll_id,
        "title": "Smoke test",
        "options": [{"id": "yes", "name": "Yes"}, {"id": "no", "name": "No"}],
        "endTime": now + 2_000,
        "timestamp": now,
        "playerId": "host"
    });
    println!("Creating poll {}", poll_id);
    host.send(Message::text(poll.to_string())).await?;

    let vote = json!({
        "type": "vote",
        "pollId": poll_id,
        "optionId": "yes",
        "playerId": "viewer",
        "timestamp": get_timestamp()
    });
    viewer.send(Message::text(vote.to_string())).await?;

    let chat = json!({"type": "message", "message": "hello from viewer", "playerId": "viewer"});
    viewer.send(Message::text(chat.to_string())).await?;

    // Host should see the vote, the chat and finally the closure
    loop {
        let frame = match timeout(Duration::from_secs(5), host.next()).await {
            Ok(Some(frame)) => frame?,
            Ok(None) => {
                println!("Relay closed the connection");
                break;
            }
            Err(_) => {
                println!("Timed out waiting for poll closure");
                break;
            }
        };

        let text = match frame.to_text() {
            Ok(text) => text.to_string(),
            Err(_) => continue,
        };
        println!("Received: {}", text);

        if let Ok(ServerMessage::VoteClosure(closure)) = decode_server_message(&text) {
            println!("Poll {} closed: {}", closure.poll_id, closure.reason);
            for result in closure.results {
                println!("  {}: {} votes", result.option_id, result.votes);
            }
            break;
        }
    }

    host.close(None).await?;
    viewer.close(None).await?;
    println!("Test client finished");

    Ok(())
}

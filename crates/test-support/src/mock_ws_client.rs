// A thin tokio-tungstenite client for driving the hub's /ws endpoint in
// integration tests, adapted from the reference repo's MockWsClient to
// speak this crate's `Event` envelope instead of `WsMessage`.

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::MaybeTlsStream;
use wire_protocol::Event;

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct MockWsClient {
    write: futures_util::stream::SplitSink<WsStream, Message>,
    read: futures_util::stream::SplitStream<WsStream>,
}

impl MockWsClient {
    pub async fn connect(url: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url).await?;
        let (write, read) = ws_stream.split();
        Ok(Self { write, read })
    }

    pub async fn send_event(&mut self, event: &Event) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string(event)?;
        self.write.send(Message::Text(json.into())).await?;
        Ok(())
    }

    /// Skip over WS control frames and return the next `Event` frame.
    pub async fn recv_event(&mut self) -> Result<Event, Box<dyn std::error::Error>> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => {
                    let event: Event = serde_json::from_str(&text)?;
                    return Ok(event);
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) => return Err("connection closed by server".into()),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err("connection stream ended".into()),
            }
        }
    }

    /// Recv with a bounded wait, for asserting something does *not* arrive.
    pub async fn recv_event_timeout(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<Event, Box<dyn std::error::Error>> {
        match tokio::time::timeout(timeout, self.recv_event()).await {
            Ok(result) => result,
            Err(_) => Err("timed out waiting for event".into()),
        }
    }

    pub async fn close(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.write.send(Message::Close(None)).await?;
        Ok(())
    }
}

use std::future::Future;
use std::sync::Arc;

use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::http::error::HttpError;
use crate::http::message::Message;
use crate::http::request::Request;
use crate::http::writer::MessageWriter;

/// Turns one client request into the bytes sent back to the client.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, request: Request) -> impl Future<Output = anyhow::Result<Vec<u8>>> + Send;
}

pub struct Connection<H> {
    reader: Option<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    handler: Arc<H>,
    state: ConnectionState,
}

pub enum ConnectionState {
    Reading,
    Processing(Request),
    Writing(MessageWriter),
    Closed,
}

impl<H: Handler> Connection<H> {
    pub fn new(stream: TcpStream, handler: Arc<H>) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: Some(reader),
            writer,
            handler,
            state: ConnectionState::Reading,
        }
    }

    /// Serves a single request. Every response is sent with
    /// `Connection: close`, so the connection always ends after one
    /// exchange.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            match &mut self.state {
                ConnectionState::Reading => match self.read_request().await? {
                    Some(request) => {
                        self.state = ConnectionState::Processing(request);
                    }
                    None => {
                        self.state = ConnectionState::Closed;
                    }
                },

                ConnectionState::Processing(_) => {
                    let ConnectionState::Processing(request) =
                        std::mem::replace(&mut self.state, ConnectionState::Closed)
                    else {
                        continue;
                    };
                    let bytes = self.handler.handle(request).await?;
                    self.state = ConnectionState::Writing(MessageWriter::new(bytes));
                }

                ConnectionState::Writing(writer) => {
                    writer.write_to_stream(&mut self.writer).await?;
                    self.state = ConnectionState::Closed;
                }

                ConnectionState::Closed => {
                    break;
                }
            }
        }

        Ok(())
    }

    /// Reads the request head. The entity stays on the socket until the
    /// handler asks for it. A client that sends no parsable request line
    /// yields `None`.
    pub async fn read_request(&mut self) -> anyhow::Result<Option<Request>> {
        let Some(reader) = self.reader.take() else {
            return Ok(None);
        };

        match Message::read_from(BufReader::new(reader)).await {
            Ok(Message::Request(request)) => {
                tracing::debug!(request = %request.firstline(), "request parsed");
                Ok(Some(request))
            }
            Ok(Message::Response(response)) => Err(HttpError::UnexpectedMessage(format!(
                "client sent a response: {:?}",
                response.firstline()
            ))
            .into()),
            Err(HttpError::MalformedFirstline(line)) => {
                tracing::debug!(firstline = %line, "malformed firstline, closing");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

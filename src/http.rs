//! Minimal HTTP/1.1 front end for [`MatchService`].
//!
//! One request per connection. Every connection runs on its own named thread
//! and the response always carries `Connection: close`.
//!
//! | Route | Method | Operation |
//! |-------|--------|-----------|
//! | `/upload_reference` | POST | [`MatchService::upload_reference`] |
//! | `/analyze` | POST | [`MatchService::analyze`] |

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde_json::json;
use thiserror::Error;

use crate::error::Status;
use crate::service::{MatchService, Response};

const MAX_HEAD_LINE: usize = 8 * 1024;
const MAX_HEADERS: usize = 100;
const READ_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum HttpError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Malformed(String),

    #[error("Request body of {length} bytes exceeds limit of {limit} bytes")]
    TooLarge { length: usize, limit: usize },
}

impl HttpError {
    /// Response to send back, `None` when the connection is unusable.
    pub fn to_response(&self) -> Option<Response> {
        let status = match self {
            HttpError::Io(_) => return None,
            HttpError::Malformed(_) => Status::ClientInputError,
            HttpError::TooLarge { .. } => Status::PayloadTooLarge,
        };
        Some(Response {
            status,
            body: json!({ "error": self.to_string() }),
        })
    }
}

/// Request line and headers.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestHead {
    pub method: String,
    /// Path without the query string.
    pub path: String,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn expects_continue(&self) -> bool {
        self.header("Expect")
            .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"))
    }

    pub fn content_length(&self) -> Result<usize, HttpError> {
        match self.header("Content-Length") {
            None => Ok(0),
            Some(v) => v
                .trim()
                .parse()
                .map_err(|_| HttpError::Malformed(format!("Invalid Content-Length: {}", v))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub head: RequestHead,
    pub body: Vec<u8>,
}

fn read_line<R: BufRead>(reader: &mut R) -> Result<String, HttpError> {
    let mut buf = Vec::new();
    reader.take(MAX_HEAD_LINE as u64).read_until(b'\n', &mut buf)?;
    if buf.last() != Some(&b'\n') {
        return Err(if buf.len() >= MAX_HEAD_LINE {
            HttpError::Malformed("Header line too long".to_string())
        } else {
            HttpError::Malformed("Unexpected end of request".to_string())
        });
    }
    let line = String::from_utf8(buf).map_err(|_| HttpError::Malformed("Header is not UTF-8".to_string()))?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

pub fn read_head<R: BufRead>(reader: &mut R) -> Result<RequestHead, HttpError> {
    let request_line = read_line(reader)?;
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target), Some(version), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(HttpError::Malformed(format!("Bad request line: {}", request_line)));
    };
    if !version.starts_with("HTTP/1.") {
        return Err(HttpError::Malformed(format!("Unsupported version: {}", version)));
    }
    let path = target.split('?').next().unwrap_or(target).to_string();

    let mut headers = Vec::new();
    loop {
        let line = read_line(reader)?;
        if line.is_empty() {
            break;
        }
        if headers.len() == MAX_HEADERS {
            return Err(HttpError::Malformed("Too many headers".to_string()));
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(HttpError::Malformed(format!("Bad header line: {}", line)));
        };
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    let head = RequestHead {
        method: method.to_string(),
        path,
        headers,
    };
    if head
        .header("Transfer-Encoding")
        .is_some_and(|v| !v.eq_ignore_ascii_case("identity"))
    {
        return Err(HttpError::Malformed("Chunked request bodies are not supported".to_string()));
    }
    Ok(head)
}

pub fn read_body<R: Read>(reader: &mut R, head: &RequestHead, max_body_bytes: usize) -> Result<Vec<u8>, HttpError> {
    let length = head.content_length()?;
    if length > max_body_bytes {
        return Err(HttpError::TooLarge {
            length,
            limit: max_body_bytes,
        });
    }
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body)?;
    Ok(body)
}

/// Reads a whole request. `Expect: 100-continue` is not answered here.
pub fn read_request<R: BufRead>(reader: &mut R, max_body_bytes: usize) -> Result<HttpRequest, HttpError> {
    let head = read_head(reader)?;
    let body = read_body(reader, &head, max_body_bytes)?;
    Ok(HttpRequest { head, body })
}

pub fn write_response<W: Write>(writer: &mut W, response: &Response) -> std::io::Result<()> {
    let body = response.body.to_string();
    write!(
        writer,
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.status.code(),
        response.status.reason(),
        body.len()
    )?;
    writer.write_all(body.as_bytes())?;
    writer.flush()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "internal error".to_string()
    }
}

fn dispatch(service: &MatchService, request: &HttpRequest) -> Response {
    let head = &request.head;
    let known = matches!(head.path.as_str(), "/upload_reference" | "/analyze");
    match (head.method.as_str(), head.path.as_str()) {
        ("POST", "/upload_reference") => service.upload_reference(&request.body, &head.headers),
        ("POST", "/analyze") => service.analyze(&request.body),
        _ if known => Response {
            status: Status::MethodNotAllowed,
            body: json!({ "error": "Method not allowed" }),
        },
        _ => Response {
            status: Status::NotFound,
            body: json!({ "error": "Not found" }),
        },
    }
}

/// Routes a parsed request. A panic in the handler becomes a 500 response.
pub fn route(service: &MatchService, request: &HttpRequest) -> Response {
    panic::catch_unwind(AssertUnwindSafe(|| dispatch(service, request))).unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        error!("handler panicked: {}", message);
        Response {
            status: Status::InternalFault,
            body: json!({ "error": message }),
        }
    })
}

fn handle_connection(stream: TcpStream, service: &MatchService, max_body_bytes: usize) -> Result<(), HttpError> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);

    let request = read_head(&mut reader).and_then(|head| {
        if head.expects_continue() && head.content_length()? <= max_body_bytes {
            writer.write_all(b"HTTP/1.1 100 Continue\r\n\r\n")?;
        }
        let body = read_body(&mut reader, &head, max_body_bytes)?;
        Ok(HttpRequest { head, body })
    });

    let response = match request {
        Ok(request) => {
            let response = route(service, &request);
            debug!(
                "{} {} -> {}",
                request.head.method,
                request.head.path,
                response.status.code()
            );
            response
        }
        Err(e) => {
            warn!("bad request: {}", e);
            match e.to_response() {
                Some(response) => response,
                None => return Err(e),
            }
        }
    };
    write_response(&mut writer, &response)?;
    Ok(())
}

/// Accepts connections forever, one named thread per connection.
pub fn serve(listener: TcpListener, service: Arc<MatchService>, max_body_bytes: usize) -> std::io::Result<()> {
    info!("listening on {}", listener.local_addr()?);
    for (n, stream) in listener.incoming().enumerate() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                error!("Error accepting client connection: {}", e);
                continue;
            }
        };
        let service = Arc::clone(&service);
        let spawned = thread::Builder::new()
            .name(format!("http-conn-{}", n))
            .spawn(move || {
                if let Err(e) = handle_connection(stream, &service, max_body_bytes) {
                    debug!("connection dropped: {}", e);
                }
            });
        if let Err(e) = spawned {
            error!("Failed to spawn connection thread: {}", e);
        }
    }
    Ok(())
}

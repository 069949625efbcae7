//! A tiny RESP2 server on a loopback socket, so the real `RedisConnector`
//! can be driven end to end.
//!
//! Commands understood:
//! * `AUTH [user] password`, checked against the configured password
//! * `PING`, `INFO`, `CLIENT ...` (always `+OK`)
//! * `ECHO text`, where `slow<ms>:<text>` waits `<ms>` before replying
//! * `HANGUP`, which closes the socket without replying
//!
//! Anything else gets `-ERR unknown command`.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

const INFO_TEXT: &str = "# Server\r\nredis_version:7.2.4\r\n\r\n# Memory\r\nused_memory:2048\r\n\r\n# Keyspace\r\ndb0:keys=3,expires=0,avg_ttl=0\r\n";

pub struct RespServer {
    pub addr: SocketAddr,
    /// Every command name received, across connections.
    pub commands: Arc<Mutex<Vec<String>>>,
}

impl RespServer {
    pub async fn start(password: Option<&str>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let commands = Arc::new(Mutex::new(Vec::new()));
        let password = password.map(str::to_string);

        let log = Arc::clone(&commands);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket, password.clone(), Arc::clone(&log)));
            }
        });
        Self { addr, commands }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn received(&self, name: &str) -> usize {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.eq_ignore_ascii_case(name))
            .count()
    }
}

async fn read_request(reader: &mut BufReader<TcpStream>) -> Option<Vec<String>> {
    let mut line = String::new();
    if reader.read_line(&mut line).await.ok()? == 0 {
        return None;
    }
    let count: usize = line.trim_end().strip_prefix('*')?.parse().ok()?;
    let mut parts = Vec::with_capacity(count);
    for _ in 0..count {
        line.clear();
        reader.read_line(&mut line).await.ok()?;
        let len: usize = line.trim_end().strip_prefix('$')?.parse().ok()?;
        let mut buf = vec![0u8; len + 2];
        reader.read_exact(&mut buf).await.ok()?;
        buf.truncate(len);
        parts.push(String::from_utf8_lossy(&buf).into_owned());
    }
    Some(parts)
}

fn bulk(text: &str) -> Vec<u8> {
    format!("${}\r\n{}\r\n", text.len(), text).into_bytes()
}

async fn serve(socket: TcpStream, password: Option<String>, log: Arc<Mutex<Vec<String>>>) {
    let mut reader = BufReader::new(socket);
    let mut authed = password.is_none();

    while let Some(parts) = read_request(&mut reader).await {
        let Some(name) = parts.first().map(|n| n.to_ascii_uppercase()) else {
            return;
        };
        log.lock().unwrap().push(name.clone());

        let reply = match name.as_str() {
            "AUTH" => {
                if parts.last() == password.as_ref() && parts.len() > 1 {
                    authed = true;
                    b"+OK\r\n".to_vec()
                } else {
                    b"-WRONGPASS invalid username-password pair or user is disabled.\r\n".to_vec()
                }
            }
            "CLIENT" => b"+OK\r\n".to_vec(),
            "HANGUP" => return,
            _ if !authed => b"-NOAUTH Authentication required.\r\n".to_vec(),
            "PING" => b"+PONG\r\n".to_vec(),
            "INFO" => bulk(INFO_TEXT),
            "ECHO" => {
                let text = parts.get(1).cloned().unwrap_or_default();
                let delay = text
                    .strip_prefix("slow")
                    .and_then(|rest| rest.split_once(':'))
                    .and_then(|(ms, _)| ms.parse().ok());
                if let Some(ms) = delay {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                }
                bulk(&text)
            }
            _ => format!("-ERR unknown command '{name}'\r\n").into_bytes(),
        };
        if reader.get_mut().write_all(&reply).await.is_err() {
            return;
        }
    }
}

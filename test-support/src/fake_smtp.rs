use log::debug;
use mailin_embedded::{Handler, Server, SslConfig};
use std::{net::IpAddr, sync::Arc, time::Duration};
use tokio::{
    sync::watch::{self, error::RecvError, Receiver, Sender},
    time::timeout,
};

pub const SMTP_PORT: u16 = 4567;
pub const POISONED_SMTP_PORT: u16 = 4568;

const SERVER_NAME: &str = "mail.example.com";

/// Keeps the data of the mail being received and publishes it once complete.
#[derive(Clone)]
struct RecordingHandler(Vec<u8>, Arc<Sender<String>>);

impl Handler for RecordingHandler {
    fn data(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.0.extend(buf);
        Ok(())
    }

    fn data_end(&mut self) -> mailin_embedded::Response {
        let content = String::from_utf8_lossy(&self.0).into_owned();
        self.0.clear();
        debug!("Received mail:\n{content}");
        // Nobody may be waiting for this mail, which is fine.
        let _ = self.1.send(content);
        mailin_embedded::response::OK
    }

    fn auth_plain(
        &mut self,
        _authorization_id: &str,
        authentication_id: &str,
        _password: &str,
    ) -> mailin_embedded::Response {
        debug!("Authenticated as {authentication_id}");
        mailin_embedded::response::AUTH_OK
    }
}

/// An SMTP server on [`SMTP_PORT`] which accepts every mail.
///
/// Only one instance can listen at a time, so tests share one through a
/// static and run serially.
pub struct FakeSmtpServer(
    std::sync::Mutex<Option<Server<RecordingHandler>>>,
    tokio::sync::Mutex<Receiver<String>>,
);

impl FakeSmtpServer {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel("".into());
        let handler = RecordingHandler(Vec::new(), Arc::new(sender));
        let mut server = Server::new(handler);
        server
            .with_name(SERVER_NAME)
            .with_ssl(SslConfig::None)
            .unwrap()
            .with_addr(format!("0.0.0.0:{SMTP_PORT}"))
            .unwrap();
        Self(
            std::sync::Mutex::new(Some(server)),
            tokio::sync::Mutex::new(receiver),
        )
    }

    /// Starts listening. Later calls do nothing.
    pub fn start(&self) {
        let mut guard = self.0.lock().unwrap();
        if let Some(server) = guard.take() {
            std::thread::spawn(move || {
                let _ = server.serve();
            });
        }
    }

    pub fn url() -> String {
        format!("smtp://localhost:{SMTP_PORT}")
    }

    /// Waits for the next mail and returns its raw content.
    pub async fn last_mail_content(&self) -> std::result::Result<String, RecvError> {
        let mut receiver = self.1.lock().await;
        receiver.changed().await?;
        let content = receiver.borrow_and_update().clone();
        drop(receiver);
        Ok(content)
    }

    /// Discards a mail left over from an earlier test.
    pub async fn flush(&self) {
        let mut receiver = self.1.lock().await;
        let _ = timeout(Duration::from_millis(100), receiver.changed()).await;
        receiver.borrow_and_update();
    }
}

impl Default for FakeSmtpServer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
struct PoisonedSmtpHandler;

impl Handler for PoisonedSmtpHandler {
    fn helo(&mut self, _ip: IpAddr, _domain: &str) -> mailin_embedded::Response {
        mailin_embedded::response::INTERNAL_ERROR
    }

    fn mail(&mut self, _ip: IpAddr, _domain: &str, _from: &str) -> mailin_embedded::Response {
        mailin_embedded::response::INTERNAL_ERROR
    }
}

/// Starts an SMTP server on [`POISONED_SMTP_PORT`] which refuses every mail.
/// Starting it again while it runs is harmless.
pub fn start_poisoned_smtp_server() {
    let mut server = Server::new(PoisonedSmtpHandler);
    server
        .with_name(SERVER_NAME)
        .with_ssl(SslConfig::None)
        .unwrap()
        .with_addr(format!("0.0.0.0:{POISONED_SMTP_PORT}"))
        .unwrap();
    std::thread::spawn(move || {
        let _ = server.serve();
    });
}

pub fn poisoned_url() -> String {
    format!("smtp://localhost:{POISONED_SMTP_PORT}")
}

use log::debug;
use mailin_embedded::{response, Handler, Response, Server, SslConfig};
use std::{
    net::{IpAddr, TcpListener},
    sync::Arc,
};
use tokio::sync::{
    watch::{self, error::RecvError, Receiver, Sender},
    Mutex,
};

const SERVER_NAME: &str = "advocacia.example";

/// The point of the SMTP dialogue at which a [`FakeSmtpServer`] refuses to go on.
#[derive(Clone, Copy, Debug)]
pub enum Rejection {
    /// EHLO/HELO fails, so no connection ever becomes usable.
    Greeting,
    /// MAIL FROM is answered with the given reply code. Connections still pass a NOOP check.
    Sender(u16),
    /// RCPT TO is answered with the given reply code.
    Recipient(u16),
}

#[derive(Clone)]
struct RecordingHandler {
    data: Vec<u8>,
    mails: Arc<Sender<String>>,
    rejection: Option<Rejection>,
}

impl RecordingHandler {
    fn refuse(&self, code: u16) -> Response {
        debug!("Refusing with {code}");
        Response::custom(code, format!("Refused by {SERVER_NAME}"))
    }
}

impl Handler for RecordingHandler {
    fn helo(&mut self, _ip: IpAddr, domain: &str) -> Response {
        debug!("Greeted by {domain}");
        match self.rejection {
            Some(Rejection::Greeting) => response::INTERNAL_ERROR,
            _ => response::OK,
        }
    }

    fn mail(&mut self, _ip: IpAddr, _domain: &str, from: &str) -> Response {
        match self.rejection {
            Some(Rejection::Sender(code)) => self.refuse(code),
            _ => {
                debug!("Mail from {from}");
                response::OK
            }
        }
    }

    fn rcpt(&mut self, to: &str) -> Response {
        match self.rejection {
            Some(Rejection::Recipient(code)) => self.refuse(code),
            _ => {
                debug!("Mail to {to}");
                response::OK
            }
        }
    }

    fn data(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.data.extend(buf);
        Ok(())
    }

    fn data_end(&mut self) -> Response {
        let content = String::from_utf8_lossy(&self.data).into_owned();
        self.data.clear();
        debug!("Received message:\n{content}");
        let _ = self.mails.send(content);
        response::OK
    }

    fn auth_plain(
        &mut self,
        _authorization_id: &str,
        authentication_id: &str,
        _password: &str,
    ) -> Response {
        debug!("Authenticated as {authentication_id}");
        response::AUTH_OK
    }
}

/// SMTP server on an ephemeral local port which records the raw DATA of every message it
/// accepts.
///
/// The listening socket is bound before the constructor returns, so the server can be used
/// right away. Every test gets its own instance; the serving thread lives until the test
/// binary exits.
pub struct FakeSmtpServer {
    port: u16,
    mails: Mutex<Receiver<String>>,
}

impl FakeSmtpServer {
    /// Starts a server accepting every message.
    pub fn start() -> Self {
        Self::start_with(None)
    }

    /// Starts a server refusing at the given point of the dialogue.
    pub fn start_rejecting(rejection: Rejection) -> Self {
        Self::start_with(Some(rejection))
    }

    fn start_with(rejection: Option<Rejection>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (sender, receiver) = watch::channel(String::new());
        let mut server = Server::new(RecordingHandler {
            data: Vec::new(),
            mails: Arc::new(sender),
            rejection,
        });
        server
            .with_name(SERVER_NAME)
            .with_ssl(SslConfig::None)
            .unwrap()
            .with_tcp_listener(listener);
        std::thread::spawn(move || {
            let _ = server.serve();
        });
        Self {
            port,
            mails: Mutex::new(receiver),
        }
    }

    pub fn smtp_url(&self) -> String {
        format!("smtp://127.0.0.1:{}", self.port)
    }

    /// Waits for the next accepted message and returns its raw content.
    pub async fn last_mail_content(&self) -> Result<String, RecvError> {
        let mut receiver = self.mails.lock().await;
        receiver.changed().await?;
        let content = receiver.borrow_and_update().clone();
        Ok(content)
    }
}

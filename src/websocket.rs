//! WebSocket ingress. Binary messages are control frames, text messages are
//! remote commands answered with a JSON reply.

use log::{debug, error, info, warn};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tungstenite::{Message, WebSocket, accept};

use crate::dispatch::Dispatcher;
use crate::pwm::PwmOutput;

const REBIND_DELAY: Duration = Duration::from_secs(5);

pub struct WebSocketIngress {
    listener: TcpListener,
    inactivity: Duration,
}

impl WebSocketIngress {
    pub fn bind(port: u16, inactivity: Duration) -> io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        Ok(WebSocketIngress {
            listener,
            inactivity,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts clients forever, one thread each.
    pub fn run<P: PwmOutput + 'static>(&self, dispatcher: &Arc<Dispatcher<P>>) -> io::Error {
        for stream in self.listener.incoming() {
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    warn!("connection error: {}", e);
                    continue;
                }
            };

            let dispatcher = Arc::clone(dispatcher);
            let inactivity = self.inactivity;
            let spawned = thread::Builder::new()
                .name(String::from("ws-client"))
                .spawn(move || serve_client(stream, &dispatcher, inactivity));
            if let Err(e) = spawned {
                error!("cannot spawn client thread: {}", e);
            }
        }
        io::Error::other("listener closed")
    }
}

fn serve_client<P: PwmOutput>(stream: TcpStream, dispatcher: &Dispatcher<P>, inactivity: Duration) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| String::from("?"));
    let source = format!("ws {}", peer);

    if let Err(e) = stream.set_read_timeout(Some(inactivity)) {
        warn!("{}: cannot set read timeout: {}", source, e);
    }

    let mut websocket = match accept(stream) {
        Ok(ws) => ws,
        Err(e) => {
            warn!("{}: handshake error: {}", source, e);
            return;
        }
    };
    info!("{}: client connected", source);

    loop {
        match websocket.read() {
            Ok(Message::Binary(frame)) => {
                dispatcher.dispatch(&source, &frame);
            }
            Ok(Message::Text(text)) => {
                let reply = dispatcher.remote(&source, &text);
                if let Err(e) = websocket.send(Message::Text(reply.to_json())) {
                    warn!("{}: cannot reply: {}", source, e);
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                debug!("{}: close requested", source);
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(e))
                if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
            {
                dispatcher.stop_motor(&source);
            }
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                break;
            }
            Err(e) => {
                warn!("{}: {}", source, e);
                break;
            }
        }
    }

    close(&mut websocket);
    dispatcher.stop_motor(&source);
    info!("{}: client disconnected", source);
}

fn close(websocket: &mut WebSocket<TcpStream>) {
    let _ = websocket.close(None);
    let _ = websocket.flush();
}

pub fn websocket_thread<P: PwmOutput + 'static>(
    dispatcher: Arc<Dispatcher<P>>,
    port: u16,
    inactivity: Duration,
) {
    loop {
        match WebSocketIngress::bind(port, inactivity) {
            Ok(ingress) => {
                info!("WebSocket server listening on port {}", port);
                let e = ingress.run(&dispatcher);
                error!("WebSocket server stopped: {}", e);
            }
            Err(e) => error!("cannot bind WebSocket port {}: {}", port, e),
        }
        thread::sleep(REBIND_DELAY);
    }
}

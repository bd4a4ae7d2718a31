//! UDP datagram ingress. Every datagram carries exactly one control frame.

use log::{error, info};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::dispatch::Dispatcher;
use crate::pwm::PwmOutput;

const RECV_BUF_LEN: usize = 64;
const REBIND_DELAY: Duration = Duration::from_secs(5);
const SOURCE: &str = "udp";

pub struct UdpIngress {
    socket: UdpSocket,
    buf: [u8; RECV_BUF_LEN],
}

impl UdpIngress {
    /// Binds `0.0.0.0:port`. A receive that stays silent for `inactivity`
    /// counts as a stalled link.
    pub fn bind(port: u16, inactivity: Duration) -> io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port))?;
        socket.set_read_timeout(Some(inactivity))?;
        Ok(UdpIngress {
            socket,
            buf: [0; RECV_BUF_LEN],
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Waits for one datagram and dispatches it. Returns `Ok(false)` when the
    /// link went quiet, after the motor has been stopped.
    pub fn poll<P: PwmOutput>(&mut self, dispatcher: &Dispatcher<P>) -> io::Result<bool> {
        match self.socket.recv_from(&mut self.buf) {
            Ok((len, _peer)) => {
                dispatcher.dispatch(SOURCE, &self.buf[..len]);
                Ok(true)
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                dispatcher.stop_motor(SOURCE);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Dispatches datagrams until the socket fails.
    pub fn run<P: PwmOutput>(&mut self, dispatcher: &Dispatcher<P>) -> io::Error {
        loop {
            if let Err(e) = self.poll(dispatcher) {
                return e;
            }
        }
    }
}

pub fn udp_thread<P: PwmOutput>(dispatcher: Arc<Dispatcher<P>>, port: u16, inactivity: Duration) {
    loop {
        match UdpIngress::bind(port, inactivity) {
            Ok(mut ingress) => {
                info!("UDP listening on port {}", port);
                let e = ingress.run(&dispatcher);
                error!("UDP socket error: {}", e);
            }
            Err(e) => error!("cannot bind UDP port {}: {}", port, e),
        }
        dispatcher.stop_motor(SOURCE);
        thread::sleep(REBIND_DELAY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChannelId, VehicleConfig};
    use crate::engine::ActuationEngine;
    use crate::pwm::MockPwm;

    #[test]
    fn datagram_reaches_engine_and_silence_stops_motor() {
        let mock = MockPwm::new();
        let config = VehicleConfig::default();
        let engine = ActuationEngine::new(mock.clone(), config.channel_table().unwrap(), 5);
        let dispatcher = Dispatcher::new(Arc::new(engine), config.mapping);

        let mut ingress = UdpIngress::bind(0, Duration::from_millis(50)).unwrap();
        let port = ingress.local_addr().unwrap().port();
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.send_to(&[1, 2, 0, 70], ("127.0.0.1", port)).unwrap();

        assert!(ingress.poll(&dispatcher).unwrap());
        assert_eq!(dispatcher.engine().motor_percent(), Some(70));
        assert_eq!(mock.duty(ChannelId::Steering), Some(614));

        assert!(!ingress.poll(&dispatcher).unwrap());
        assert_eq!(dispatcher.engine().motor_percent(), Some(0));
        assert_eq!(mock.duty(ChannelId::MotorForward), Some(0));
    }
}

//! Control path of a remotely driven vehicle: binary control frames and
//! remote commands in, steering servo and H-bridge motor PWM out.

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod frame;
pub mod led;
pub mod logger;
pub mod mapper;
pub mod pwm;
pub mod remote;
pub mod signal;
pub mod udp;
pub mod websocket;

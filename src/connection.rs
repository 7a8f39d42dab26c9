use std::path::PathBuf;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio_modbus::client::{Context, Writer as _};
use tokio_modbus::prelude::{Slave, SlaveContext as _};
use tokio_serial::{DataBits, Parity, SerialStream, StopBits};
use tracing::{debug, info, trace, warn};

use crate::codec::{self, BaudRate};
use crate::dispatch::{Transport, TransportFault};
use crate::registers::FunctionCode;

/// Attempts made for each request over TCP before giving up.
pub const TCP_ATTEMPTS: usize = 3;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("neither a serial port nor a host has been defined")]
    NoTarget,
    #[error("lookup of `{1}` failed")]
    LookupHost(#[source] std::io::Error, String),
    #[error("could not connect to `{1}` over TCP")]
    Connect(#[source] std::io::Error, String),
    #[error("connecting to `{0}` timed out")]
    ConnectTimeout(String),
    #[error("could not open {1:?} as a serial port")]
    OpenDevice(#[source] tokio_serial::Error, PathBuf),
}

#[derive(clap::Parser, Clone, Debug)]
#[group(id = "connection::Args")]
pub struct Args {
    #[clap(flatten)]
    how: ConnectionGroup,

    /// Baudrate (when using a serial port).
    #[arg(long, short = 'b', default_value_t = BaudRate::B9600)]
    pub baudrate: BaudRate,

    /// Modbus gateway TCP port.
    #[arg(long, default_value_t = 502)]
    pub tcp_port: u16,

    /// Modbus unit id to use (1-255). This is the "slave id" or "address" of the display.
    #[arg(long, short = 'u', default_value = "1", value_parser = codec::parse_unit_id)]
    pub unit_id: u8,

    /// Consider a request failed if no response arrives within this time.
    #[arg(long, short = 't', default_value = "2s")]
    pub timeout: humantime::Duration,
}

#[derive(clap::Parser, Clone, Debug)]
#[group(multiple = false)]
pub struct ConnectionGroup {
    /// Talk to the display over Modbus RTU on this serial (RS-485) device.
    #[arg(long, short = 'p')]
    serial_port: Option<PathBuf>,
    /// Talk to the display through a Modbus TCP gateway at this hostname.
    #[arg(long)]
    host: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    Serial { device: PathBuf, baudrate: BaudRate },
    Tcp { host: String, port: u16 },
}

impl Args {
    pub fn target(&self) -> Result<Target, Error> {
        match (&self.how.serial_port, &self.how.host) {
            (_, Some(host)) => Ok(Target::Tcp { host: host.clone(), port: self.tcp_port }),
            (Some(device), None) => {
                Ok(Target::Serial { device: device.clone(), baudrate: self.baudrate })
            }
            (None, None) => Err(Error::NoTarget),
        }
    }
}

/// An open Modbus client talking to one or more displays.
pub struct Connection {
    context: Context,
    timeout: Duration,
    attempts: usize,
}

impl Connection {
    pub async fn open(args: &Args) -> Result<Connection, Error> {
        let timeout = *args.timeout;
        match args.target()? {
            Target::Tcp { host, port } => {
                let context = Self::connect_tcp(&host, port, timeout).await?;
                Ok(Self { context, timeout, attempts: TCP_ATTEMPTS })
            }
            Target::Serial { device, baudrate } => {
                let context = Self::open_serial(device, baudrate, timeout)?;
                Ok(Self { context, timeout, attempts: 1 })
            }
        }
    }

    async fn connect_tcp(host: &str, port: u16, timeout: Duration) -> Result<Context, Error> {
        let address = format!("{host}:{port}");
        info!(message = "connecting...", address);
        let addresses = tokio::net::lookup_host(&address)
            .await
            .map_err(|e| Error::LookupHost(e, address.clone()))?
            .collect::<Vec<_>>();
        debug!(message = "resolved", ?addresses);
        let socket = tokio::time::timeout(timeout, TcpStream::connect(&*addresses))
            .await
            .map_err(|_| Error::ConnectTimeout(address.clone()))?
            .map_err(|e| Error::Connect(e, address.clone()))?;
        let nodelay_result = socket.set_nodelay(true);
        trace!(message = "setting nodelay", is_error = ?nodelay_result.err());
        info!(message = "connected");
        Ok(tokio_modbus::client::tcp::attach(socket))
    }

    fn open_serial(
        device: PathBuf,
        baudrate: BaudRate,
        timeout: Duration,
    ) -> Result<Context, Error> {
        info!(message = "opening serial port", ?device, %baudrate);
        let builder = tokio_serial::new(device.to_string_lossy(), baudrate.bits_per_second())
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(timeout);
        let port = SerialStream::open(&builder).map_err(|e| Error::OpenDevice(e, device))?;
        info!(message = "opened");
        Ok(tokio_modbus::client::rtu::attach(port))
    }

    async fn write(
        &mut self,
        request: WriteRequest<'_>,
        unit_id: u8,
    ) -> Result<Option<Vec<u16>>, TransportFault> {
        self.context.set_slave(Slave(unit_id));
        let mut attempt = 1;
        loop {
            let response = tokio::time::timeout(self.timeout, request.send(&mut self.context)).await;
            let fault = match response {
                Ok(Ok(Ok(()))) => return Ok(None),
                // Exception responses are never retried.
                Ok(Ok(Err(exception))) => {
                    let function_code = request.function_code().code() | 0x80;
                    let text = exception.to_string();
                    return Err(TransportFault {
                        raw: Some(vec![function_code, u8::from(exception)]),
                        function_code: Some(function_code),
                        text: Some(text),
                    });
                }
                Ok(Err(e)) => TransportFault::with_text(e.to_string()),
                Err(_) => TransportFault::with_text(format!(
                    "no response within {}",
                    humantime::format_duration(self.timeout)
                )),
            };
            if attempt >= self.attempts {
                return Err(fault);
            }
            warn!(message = "request failed, retrying", attempt, error = %fault);
            attempt += 1;
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum WriteRequest<'a> {
    Single { address: u16, value: u16 },
    Multiple { address: u16, values: &'a [u16] },
}

impl WriteRequest<'_> {
    fn function_code(&self) -> FunctionCode {
        match self {
            Self::Single { .. } => FunctionCode::WriteSingle,
            Self::Multiple { .. } => FunctionCode::WriteMultiple,
        }
    }

    async fn send(self, context: &mut Context) -> tokio_modbus::Result<()> {
        match self {
            Self::Single { address, value } => context.write_single_register(address, value).await,
            Self::Multiple { address, values } => {
                context.write_multiple_registers(address, values).await
            }
        }
    }
}

impl Transport for Connection {
    async fn write_single_register(
        &mut self,
        address: u16,
        value: u16,
        unit_id: u8,
    ) -> Result<Option<Vec<u16>>, TransportFault> {
        self.write(WriteRequest::Single { address, value }, unit_id).await
    }

    async fn write_multiple_registers(
        &mut self,
        address: u16,
        values: &[u16],
        unit_id: u8,
    ) -> Result<Option<Vec<u16>>, TransportFault> {
        self.write(WriteRequest::Multiple { address, values }, unit_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser as _;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
    use tokio::net::TcpListener;

    /// A Modbus TCP gateway answering every request PDU with `reply`, or not at all on `None`.
    async fn serve(
        listener: TcpListener,
        requests: Arc<AtomicUsize>,
        reply: fn(&[u8]) -> Option<Vec<u8>>,
    ) -> std::io::Result<()> {
        let (mut socket, _) = listener.accept().await?;
        loop {
            let mut header = [0; 7];
            socket.read_exact(&mut header).await?;
            let length = u16::from_be_bytes([header[4], header[5]]);
            let mut pdu = vec![0; usize::from(length) - 1];
            socket.read_exact(&mut pdu).await?;
            requests.fetch_add(1, Ordering::SeqCst);
            if let Some(response) = reply(&pdu) {
                let mut frame = header[..4].to_vec();
                frame.extend((response.len() as u16 + 1).to_be_bytes());
                frame.push(header[6]);
                frame.extend(response);
                socket.write_all(&frame).await?;
            }
        }
    }

    async fn gateway(reply: fn(&[u8]) -> Option<Vec<u8>>) -> (Args, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port().to_string();
        let requests = Arc::new(AtomicUsize::new(0));
        tokio::spawn(serve(listener, Arc::clone(&requests), reply));
        let args = Args::try_parse_from([
            "led485",
            "--host",
            "127.0.0.1",
            "--tcp-port",
            &port,
            "-t",
            "100ms",
        ])
        .unwrap();
        (args, requests)
    }

    #[test]
    fn defaults() {
        let args = Args::try_parse_from(["led485", "--host", "gateway.local"]).unwrap();
        assert_eq!(args.unit_id, 1);
        assert_eq!(args.baudrate, BaudRate::B9600);
        assert_eq!(*args.timeout, Duration::from_secs(2));
        assert_eq!(
            args.target().unwrap(),
            Target::Tcp { host: "gateway.local".into(), port: 502 }
        );
    }

    #[test]
    fn serial_target() {
        let args =
            Args::try_parse_from(["led485", "-p", "/dev/ttyUSB0", "-b", "19200", "-u", "12"])
                .unwrap();
        assert_eq!(args.unit_id, 12);
        assert_eq!(
            args.target().unwrap(),
            Target::Serial { device: "/dev/ttyUSB0".into(), baudrate: BaudRate::B19200 }
        );
    }

    #[test]
    fn no_target_is_a_configuration_error() {
        let args = Args::try_parse_from(["led485"]).unwrap();
        assert!(matches!(args.target(), Err(Error::NoTarget)));
    }

    #[test]
    fn targets_are_exclusive() {
        assert!(Args::try_parse_from(["led485", "-p", "/dev/ttyUSB0", "--host", "gw"]).is_err());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(Args::try_parse_from(["led485", "--host", "gw", "-u", "0"]).is_err());
        assert!(Args::try_parse_from(["led485", "--host", "gw", "-u", "256"]).is_err());
        assert!(Args::try_parse_from(["led485", "--host", "gw", "-b", "9601"]).is_err());
    }

    #[tokio::test]
    async fn tcp_write_acknowledged() {
        // A single register write is acknowledged by echoing the request.
        let (args, requests) = gateway(|pdu| Some(pdu.to_vec())).await;
        let mut connection = Connection::open(&args).await.unwrap();
        assert_eq!(connection.write_single_register(0x04, 2, 7).await, Ok(None));
        assert_eq!(requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exception_is_reported_once() {
        let (args, requests) = gateway(|pdu| Some(vec![pdu[0] | 0x80, 0x02])).await;
        let mut connection = Connection::open(&args).await.unwrap();
        let fault =
            connection.write_multiple_registers(0x70, &[0x2020, 0x4849], 1).await.unwrap_err();
        assert_eq!(fault.raw, Some(vec![0x90, 0x02]));
        assert_eq!(fault.function_code, Some(0x90));
        assert!(fault.text.is_some());
        assert_eq!(requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn silent_gateway_is_retried() {
        let (args, requests) = gateway(|_| None).await;
        let mut connection = Connection::open(&args).await.unwrap();
        let fault = connection.write_single_register(0x00, 42, 1).await.unwrap_err();
        assert_eq!(fault.raw, None);
        assert_eq!(fault.function_code, None);
        assert_eq!(fault.text.as_deref(), Some("no response within 100ms"));
        assert_eq!(requests.load(Ordering::SeqCst), TCP_ATTEMPTS);
    }

    #[tokio::test]
    async fn open_without_target_fails_before_any_io() {
        let args = Args::try_parse_from(["led485"]).unwrap();
        assert!(matches!(Connection::open(&args).await, Err(Error::NoTarget)));
    }
}

use crate::registers::Model;

#[derive(thiserror::Error, Debug)]
#[error("display model `{0}` is not known")]
pub struct UnknownModel(String);

#[derive(clap::Parser, Clone, Debug)]
#[group(id = "commands::ModelArgs")]
pub struct ModelArgs {
    /// The display model whose register map to use.
    #[arg(long, default_value = "LED-485")]
    model: String,
}

impl ModelArgs {
    pub fn resolve(&self) -> Result<&'static Model, UnknownModel> {
        Model::by_name(&self.model).ok_or_else(|| UnknownModel(self.model.clone()))
    }
}

/// Requests are sent one after another, so a single thread drives the connection.
fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread().enable_all().build()
}

pub mod registers {
    use crate::output::{self, Record};
    use crate::registers::RegisterEntry;

    /// Search and output the operations a display model supports.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        model: super::ModelArgs,
        /// Only list operations whose name, description or address contains this text.
        filter: Option<String>,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not pick the register map")]
        Model(#[source] super::UnknownModel),
        #[error("could not output the register map")]
        Output(#[source] output::Error),
    }

    impl Record for RegisterEntry {
        const HEADERS: &'static [&'static str] =
            &["Operation", "Function", "Address", "Registers", "Type", "Min", "Max", "Description"];

        fn cells(&self) -> Vec<String> {
            vec![
                self.name.to_string(),
                self.function_code.to_string(),
                format!("{:#04x}", self.address),
                self.register_count.map(|c| c.to_string()).unwrap_or_else(|| "n".to_string()),
                self.payload_type.to_string(),
                self.minimum.map(|v| v.to_string()).unwrap_or_default(),
                self.maximum.map(|v| v.to_string()).unwrap_or_default(),
                self.description.to_string(),
            ]
        }
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let model = args.model.resolve().map_err(Error::Model)?;
        let mut output = args.output.to_output::<RegisterEntry>().map_err(Error::Output)?;
        for entry in model.entries {
            if let Some(pattern) = &args.filter {
                if !entry.is_match(pattern) {
                    continue;
                }
            }
            output.record(entry).map_err(Error::Output)?;
        }
        output.commit().map_err(Error::Output)
    }
}

pub mod setup {
    use std::io::Write;

    use tracing::info;

    use crate::codec::{self, BaudRate, DisplaySize};
    use crate::connection::{self, Connection};
    use crate::dispatch::{self, Dispatcher, Transport};
    use crate::registers::{EncodeError, Model, Payload};

    /// Configure a display and show something on it.
    ///
    /// Requested actions run in a fixed order over one connection: set the baudrate, set the unit
    /// id, then show a value, a decimal point, a custom segment string or an ASCII string. The
    /// first failure aborts the remaining actions; writes already made are not undone.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        model: super::ModelArgs,
        /// Number of 7-segment elements in the display.
        #[arg(long, short = 'd', default_value_t = DisplaySize::default())]
        display_size: DisplaySize,
        #[clap(flatten)]
        settings: Settings,
        #[clap(flatten)]
        show: Show,
    }

    #[derive(clap::Args, Clone, Debug)]
    #[group(multiple = false)]
    struct Settings {
        /// Set the serial baudrate of the display.
        #[arg(long)]
        set_baudrate: Option<BaudRate>,
        /// Set the modbus unit id of the display (1-255).
        #[arg(long, value_parser = codec::parse_unit_id)]
        set_unit_id: Option<u8>,
    }

    #[derive(clap::Args, Clone, Debug)]
    #[group(multiple = false)]
    struct Show {
        /// Show a 16-bit signed integer on the display. See also `--decimal-point`.
        #[arg(long, allow_negative_numbers = true)]
        value: Option<i64>,
        /// Position of the decimal point. The setting is lost when the display reboots.
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=3))]
        decimal_point: Option<u8>,
        /// Write a simple string using the "custom segment" method: `_` (space), 0-9, A-Z.
        #[arg(long)]
        cust_seg: Option<String>,
        /// Write an ASCII string.
        #[arg(long = "str")]
        text: Option<String>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not pick the register map")]
        Model(#[source] super::UnknownModel),
        #[error("invalid text for `{1}`")]
        Text(#[source] codec::Error, &'static str),
        #[error("invalid value for `{1}`")]
        Payload(#[source] EncodeError, &'static str),
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("could not connect to the display")]
        Connect(#[source] connection::Error),
        #[error("could not write to the terminal")]
        WriteStdout(#[source] std::io::Error),
        #[error("display request failed")]
        Dispatch(#[source] dispatch::Error),
    }

    #[derive(Debug, PartialEq)]
    enum Announce {
        /// A complete progress line.
        Line(String),
        /// Printed before the request, the reply's info text completes the line.
        Display(String),
    }

    #[derive(Debug, PartialEq)]
    struct Step {
        operation: &'static str,
        payload: Payload,
        announce: Announce,
    }

    /// Turn the arguments into requests, validating every payload before anything is sent.
    fn plan(args: &Args, model: &Model) -> Result<Vec<Step>, Error> {
        let mut steps = Vec::new();
        if let Some(baudrate) = args.settings.set_baudrate {
            steps.push(Step {
                operation: "set_baudrate",
                payload: Payload::Integer(baudrate.code().into()),
                announce: Announce::Line(format!("Setting the baudrate to {baudrate}")),
            });
        }
        if let Some(unit_id) = args.settings.set_unit_id {
            steps.push(Step {
                operation: "set_unit_id",
                payload: Payload::Integer(unit_id.into()),
                announce: Announce::Line(format!(
                    "Setting the unit id (\"modbus address\") to {unit_id}"
                )),
            });
        }
        if let Some(value) = args.show.value {
            steps.push(Step {
                operation: "i16",
                payload: Payload::Integer(value),
                announce: Announce::Display(format!("Display: \"{value}\" ")),
            });
        }
        if let Some(position) = args.show.decimal_point {
            steps.push(Step {
                operation: "dec_point",
                payload: Payload::Integer(position.into()),
                announce: Announce::Display(format!("Display: \"{position}\" ")),
            });
        }
        if let Some(text) = &args.show.cust_seg {
            let operation = "str_custom_segment";
            let text_error = |e| Error::Text(e, operation);
            args.display_size.check(text).map_err(text_error)?;
            let normalized = codec::normalize_segment_text(text).map_err(text_error)?;
            let words = codec::encode_segment_string(text).map_err(text_error)?;
            steps.push(Step {
                operation,
                announce: Announce::Display(format!("Display: \"{normalized}\" {words:?}\n")),
                payload: Payload::Words(words),
            });
        }
        if let Some(text) = &args.show.text {
            let operation = "str_ascii";
            let text_error = |e| Error::Text(e, operation);
            let width = args.display_size.digits();
            args.display_size.check(text).map_err(text_error)?;
            let justified = codec::justify_ascii_text(text, width).map_err(text_error)?;
            let words = codec::encode_ascii_string(text, width).map_err(text_error)?;
            steps.push(Step {
                operation,
                announce: Announce::Display(format!("Display: \"{justified}\" ")),
                payload: Payload::Words(words),
            });
        }
        for step in &steps {
            if let Some(entry) = model.entry(step.operation) {
                entry.encode(&step.payload).map_err(|e| Error::Payload(e, entry.name))?;
            }
        }
        Ok(steps)
    }

    async fn execute<T: Transport>(
        dispatcher: &mut Dispatcher<T>,
        steps: &[Step],
        unit_id: u8,
        out: &mut impl Write,
    ) -> Result<(), Error> {
        for step in steps {
            let announced = match &step.announce {
                Announce::Line(line) => writeln!(out, "{line}"),
                Announce::Display(prefix) => write!(out, "{prefix}"),
            };
            announced.and_then(|()| out.flush()).map_err(Error::WriteStdout)?;
            let reply = dispatcher.execute(step.operation, Some(&step.payload), unit_id).await;
            if let Announce::Display(_) = step.announce {
                let info_text = reply.as_ref().map(|r| r.info_text).unwrap_or_default();
                writeln!(out, "{info_text}").map_err(Error::WriteStdout)?;
            }
            let reply = reply.map_err(Error::Dispatch)?;
            if let Some(value) = reply.value {
                info!(message = "display echoed", operation = step.operation, %value);
            }
        }
        Ok(())
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let model = args.model.resolve().map_err(Error::Model)?;
        let steps = plan(&args, model)?;
        println!("Starting the {} setuptool programm", model.name);
        if steps.is_empty() {
            info!(message = "no action requested, not connecting");
            return Ok(());
        }
        let runtime = super::runtime().map_err(Error::Runtime)?;
        runtime.block_on(async {
            let connection = Connection::open(&args.connection).await.map_err(Error::Connect)?;
            let mut dispatcher = Dispatcher::new(model, connection);
            let mut stdout = std::io::stdout();
            execute(&mut dispatcher, &steps, args.connection.unit_id, &mut stdout).await
        })
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::dispatch::TransportFault;
        use crate::dispatch::tests::{Call, StubTransport};
        use crate::registers::LED_485;
        use clap::Parser as _;

        fn parse(extra: &[&str]) -> Result<Args, clap::Error> {
            let base = ["led485", "--host", "gateway"];
            Args::try_parse_from(base.iter().chain(extra).copied())
        }

        #[test]
        fn actions_are_exclusive_per_group() {
            assert!(parse(&["--value", "1", "--str", "HI"]).is_err());
            assert!(parse(&["--set-baudrate", "9600", "--set-unit-id", "3"]).is_err());
            assert!(parse(&["--set-baudrate", "9600", "--value", "-12"]).is_ok());
            assert!(parse(&["--decimal-point", "4"]).is_err());
            assert!(parse(&["--set-unit-id", "0"]).is_err());
            assert!(parse(&["-d", "7"]).is_err());
        }

        #[test]
        fn plan_runs_in_fixed_order() {
            let args = parse(&["--value", "-12", "--set-baudrate", "19200"]).unwrap();
            let steps = plan(&args, &LED_485).unwrap();
            let operations = steps.iter().map(|s| s.operation).collect::<Vec<_>>();
            assert_eq!(operations, ["set_baudrate", "i16"]);
            assert_eq!(steps[0].payload, Payload::Integer(5));
            assert_eq!(steps[0].announce, Announce::Line("Setting the baudrate to 19200".into()));
            assert_eq!(steps[1].announce, Announce::Display("Display: \"-12\" ".into()));
        }

        #[test]
        fn plan_encodes_text() {
            let args = parse(&["--cust-seg", "a_1"]).unwrap();
            let steps = plan(&args, &LED_485).unwrap();
            assert_eq!(steps[0].payload, Payload::Words(vec![0x7700, 0x0600]));
            assert_eq!(
                steps[0].announce,
                Announce::Display("Display: \"A 1 \" [30464, 1536]\n".into())
            );

            let args = parse(&["-d", "4", "--str", "HI"]).unwrap();
            let steps = plan(&args, &LED_485).unwrap();
            assert_eq!(steps[0].payload, Payload::Words(vec![0x2020, 0x4849]));
            assert_eq!(steps[0].announce, Announce::Display("Display: \"  HI\" ".into()));
        }

        #[test]
        fn plan_rejects_bad_input_up_front() {
            let args = parse(&["--cust-seg", "A-1"]).unwrap();
            assert!(matches!(
                plan(&args, &LED_485),
                Err(Error::Text(codec::Error::SegmentCharacter('-'), "str_custom_segment"))
            ));
            let args = parse(&["-d", "4", "--str", "HELLO"]).unwrap();
            assert!(matches!(plan(&args, &LED_485), Err(Error::Text(codec::Error::TextLength(..), _))));
            let args = parse(&["--value", "32767"]).unwrap();
            assert!(matches!(plan(&args, &LED_485), Err(Error::Payload(EncodeError::OutOfRange(..), "i16"))));
        }

        #[test]
        fn nothing_requested_never_connects() {
            let args = Args::try_parse_from(["led485", "--host", "unreachable.invalid"]).unwrap();
            run(args).unwrap();
        }

        #[tokio::test]
        async fn execute_prints_progress() {
            let args = parse(&["--set-unit-id", "9", "--decimal-point", "2"]).unwrap();
            let steps = plan(&args, &LED_485).unwrap();
            let mut dispatcher = Dispatcher::new(&LED_485, StubTransport::default());
            let mut out = Vec::new();
            execute(&mut dispatcher, &steps, 1, &mut out).await.unwrap();
            assert_eq!(
                String::from_utf8(out).unwrap(),
                "Setting the unit id (\"modbus address\") to 9\n\
                 Display: \"2\" Position of decimalpoint\n"
            );
            assert_eq!(
                dispatcher.transport().calls,
                [
                    Call::Single { address: 0x02, value: 9, unit_id: 1 },
                    Call::Single { address: 0x04, value: 2, unit_id: 1 },
                ]
            );
        }

        #[tokio::test]
        async fn first_failure_stops_the_rest() {
            let args = parse(&["--set-baudrate", "4800", "--str", "HI"]).unwrap();
            let steps = plan(&args, &LED_485).unwrap();
            let stub = StubTransport {
                fault: Some(TransportFault::with_text("no response")),
                ..Default::default()
            };
            let mut dispatcher = Dispatcher::new(&LED_485, stub);
            let mut out = Vec::new();
            let err = execute(&mut dispatcher, &steps, 1, &mut out).await.unwrap_err();
            assert!(matches!(err, Error::Dispatch(dispatch::Error::Transport(_, "set_baudrate"))));
            assert_eq!(dispatcher.transport().calls.len(), 1);
        }
    }
}

pub mod write {
    use crate::connection::{self, Connection};
    use crate::dispatch::{self, Dispatcher};
    use crate::registers::{Payload, PayloadType, RegisterEntry};

    /// Write one operation of the register map, e.g. `write float 1.5`.
    ///
    /// Operations the model does not support are reported, but are not an error.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        model: super::ModelArgs,
        /// The operation to perform. See the `registers` command for the list.
        operation: String,
        /// An integer, a float, or comma-separated register words for RAW operations.
        #[arg(allow_negative_numbers = true)]
        value: Option<String>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not pick the register map")]
        Model(#[source] super::UnknownModel),
        #[error("`{1}` is not an integer")]
        ParseInteger(#[source] std::num::ParseIntError, String),
        #[error("`{1}` is not a float")]
        ParseFloat(#[source] std::num::ParseFloatError, String),
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("could not connect to the display")]
        Connect(#[source] connection::Error),
        #[error("display request failed")]
        Dispatch(#[source] dispatch::Error),
    }

    fn parse_word(word: &str) -> Result<u16, Error> {
        let word = word.trim();
        let parsed = match word.strip_prefix("0x").or_else(|| word.strip_prefix("0X")) {
            Some(hex) => u16::from_str_radix(hex, 16),
            None => word.parse(),
        };
        parsed.map_err(|e| Error::ParseInteger(e, word.to_string()))
    }

    fn parse_payload(entry: &RegisterEntry, value: &str) -> Result<Payload, Error> {
        Ok(match entry.payload_type {
            PayloadType::U16 | PayloadType::I16 | PayloadType::None => Payload::Integer(
                value.trim().parse().map_err(|e| Error::ParseInteger(e, value.to_string()))?,
            ),
            PayloadType::F32 => Payload::Float(
                value.trim().parse().map_err(|e| Error::ParseFloat(e, value.to_string()))?,
            ),
            PayloadType::Raw => {
                Payload::Words(value.split(',').map(parse_word).collect::<Result<_, _>>()?)
            }
        })
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let model = args.model.resolve().map_err(Error::Model)?;
        let payload = match (model.entry(&args.operation), &args.value) {
            (Some(entry), Some(value)) => Some(parse_payload(entry, value)?),
            _ => None,
        };
        let runtime = super::runtime().map_err(Error::Runtime)?;
        let reply = runtime.block_on(async {
            let connection = Connection::open(&args.connection).await.map_err(Error::Connect)?;
            let mut dispatcher = Dispatcher::new(model, connection);
            dispatcher
                .execute(&args.operation, payload.as_ref(), args.connection.unit_id)
                .await
                .map_err(Error::Dispatch)
        })?;
        match reply.value {
            Some(value) => println!("{}: {} ({value})", args.operation, reply.info_text),
            None => println!("{}: {}", args.operation, reply.info_text),
        }
        Ok(())
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::registers::LED_485;

        #[test]
        fn payloads_follow_the_entry_type() {
            let entry = |name| LED_485.entry(name).unwrap();
            assert_eq!(parse_payload(entry("i16"), "-5").unwrap(), Payload::Integer(-5));
            assert_eq!(parse_payload(entry("float"), "1.5").unwrap(), Payload::Float(1.5));
            assert_eq!(
                parse_payload(entry("str_ascii"), "0x2020, 18505").unwrap(),
                Payload::Words(vec![0x2020, 0x4849])
            );
            assert!(matches!(parse_payload(entry("dec_point"), "two"), Err(Error::ParseInteger(..))));
            assert!(matches!(parse_payload(entry("float"), "x"), Err(Error::ParseFloat(..))));
            assert!(matches!(
                parse_payload(entry("str_ascii"), "0x10000"),
                Err(Error::ParseInteger(..))
            ));
        }
    }
}

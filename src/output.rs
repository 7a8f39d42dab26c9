use std::path::PathBuf;

use csv_core::WriteResult;

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum Format {
    Table,
    Jsonl,
    Csv,
}

#[derive(clap::Parser, Clone, Debug)]
#[group(id = "output::Args")]
pub struct Args {
    /// Write to this file instead of the terminal.
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
    #[arg(long, short='f', value_enum, default_value_t = Format::Table)]
    format: Format,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not open the specified output file at {1:?}")]
    OpenOutputFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the output file at {1:?}")]
    WriteFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the terminal")]
    WriteStdout(#[source] std::io::Error),
    #[error("could not serialize a record to JSON")]
    SerializeJson(#[source] serde_json::Error),
}

/// Something that can be shown as one row of a table or one JSON line.
pub trait Record: serde::Serialize {
    const HEADERS: &'static [&'static str];
    fn cells(&self) -> Vec<String>;
}

impl Args {
    pub fn to_output<R: Record>(self) -> Result<Output<R>, Error> {
        let io = match &self.output {
            None => Box::new(std::io::stdout().lock()) as Box<_>,
            Some(path) => Box::new(
                std::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .map_err(|e| Error::OpenOutputFile(e, path.clone()))?,
            ) as Box<_>,
        };
        Ok(Output::new(self.format, io, self.output))
    }
}

pub struct Output<R> {
    path: Option<PathBuf>,
    io: Box<dyn std::io::Write>,
    formatter: Formatter,
    record: std::marker::PhantomData<fn(&R)>,
}

enum Formatter {
    Csv { wrote_headers: bool },
    Table { comfy: comfy_table::Table },
    Jsonl,
}

impl<R: Record> Output<R> {
    pub fn new(format: Format, io: Box<dyn std::io::Write>, path: Option<PathBuf>) -> Self {
        let formatter = match format {
            Format::Table => {
                let mut comfy = comfy_table::Table::new();
                comfy
                    .set_header(R::HEADERS.to_vec())
                    .set_content_arrangement(comfy_table::ContentArrangement::Dynamic);
                Formatter::Table { comfy }
            }
            Format::Jsonl => Formatter::Jsonl,
            Format::Csv => Formatter::Csv { wrote_headers: false },
        };
        Self { path, io, formatter, record: std::marker::PhantomData }
    }

    fn write_csv_row<V: std::ops::Deref<Target = str>>(
        &mut self,
        values: &[V],
    ) -> Result<(), Error> {
        let max_len = 2 + 2 * values.iter().map(|v| v.len()).max().unwrap_or(0);
        let mut output = vec![0; max_len];
        let mut writer = csv_core::Writer::new();
        for (index, value) in values.iter().enumerate() {
            if index > 0 {
                let (WriteResult::InputEmpty, ob) = writer.delimiter(&mut output) else {
                    panic!("something wrong with csv output");
                };
                self.io.write_all(&output[..ob]).map_err(|e| self.write_error(e))?;
            }
            let (WriteResult::InputEmpty, ib, ob) = writer.field(value.as_bytes(), &mut output)
            else {
                panic!("something wrong with csv output");
            };
            assert_eq!(value.len(), ib);
            self.io.write_all(&output[..ob]).map_err(|e| self.write_error(e))?;
        }
        let (WriteResult::InputEmpty, ob) = writer.terminator(&mut output) else {
            panic!("something wrong with csv output");
        };
        self.io.write_all(&output[..ob]).map_err(|e| self.write_error(e))
    }

    pub fn record(&mut self, record: &R) -> Result<(), Error> {
        match &mut self.formatter {
            Formatter::Csv { wrote_headers } => {
                if !*wrote_headers {
                    *wrote_headers = true;
                    self.write_csv_row(R::HEADERS)?;
                }
                self.write_csv_row(&record.cells())?;
            }
            Formatter::Table { comfy } => {
                comfy.add_row(record.cells());
            }
            Formatter::Jsonl => {
                serde_json::to_writer(&mut self.io, record).map_err(Error::SerializeJson)?;
                writeln!(self.io).map_err(|e| self.write_error(e))?
            }
        }
        Ok(())
    }

    fn write_error(&self, e: std::io::Error) -> Error {
        match &self.path {
            None => Error::WriteStdout(e),
            Some(p) => Error::WriteFile(e, p.into()),
        }
    }

    pub fn commit(mut self) -> Result<(), Error> {
        match &self.formatter {
            Formatter::Csv { wrote_headers: false } => {
                self.write_csv_row(R::HEADERS)?;
            }
            Formatter::Csv { wrote_headers: true } => {}
            Formatter::Table { comfy } => {
                writeln!(self.io, "{comfy}").map_err(|e| self.write_error(e))?;
            }
            Formatter::Jsonl => {}
        }
        self.io.flush().map_err(|e| self.write_error(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::sync::{Arc, Mutex};

    #[derive(serde::Serialize)]
    struct Pair {
        name: &'static str,
        words: u16,
    }

    impl Record for Pair {
        const HEADERS: &'static [&'static str] = &["Name", "Words"];
        fn cells(&self) -> Vec<String> {
            vec![self.name.to_string(), self.words.to_string()]
        }
    }

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn render(format: Format, records: &[Pair]) -> String {
        let sink = Shared::default();
        let mut output = Output::<Pair>::new(format, Box::new(sink.clone()), None);
        for record in records {
            output.record(record).unwrap();
        }
        output.commit().unwrap();
        String::from_utf8(sink.0.lock().unwrap().clone()).unwrap()
    }

    #[test]
    fn csv_has_headers_and_quoting() {
        let records = [Pair { name: "i16", words: 1 }, Pair { name: "a,b", words: 2 }];
        assert_eq!(render(Format::Csv, &records), "Name,Words\ni16,1\n\"a,b\",2\n");
        assert_eq!(render(Format::Csv, &[]), "Name,Words\n");
    }

    #[test]
    fn jsonl_is_one_object_per_line() {
        let records = [Pair { name: "float", words: 2 }];
        assert_eq!(render(Format::Jsonl, &records), "{\"name\":\"float\",\"words\":2}\n");
    }

    #[test]
    fn table_mentions_every_cell() {
        let table = render(Format::Table, &[Pair { name: "str_ascii", words: 3 }]);
        assert!(table.contains("Name"));
        assert!(table.contains("str_ascii"));
    }
}

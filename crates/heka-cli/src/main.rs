//! `heka-cat`: a message-dump utility for framed Heka streams, grounded in
//! `src/cli/lsb_heka_cat.c`. Reads a file (or stdin), frames it with
//! `heka_wire::framer`, filters with a `heka_matcher` expression, and
//! writes text, Heka-passthrough, or count-only output.

use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::thread::sleep;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use heka_matcher::{compile, eval, Node};
use heka_wire::{find_message, FieldValue, FindResult, InputBuffer, Message};

const FOLLOW_POLL: Duration = Duration::from_secs(1);
/// Matches the C source's `1024 * 1024 * 1024` input buffer ceiling.
const MAX_MESSAGE_SIZE: usize = 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Text,
    Count,
    Heka,
}

/// Heka-framed message dump utility.
#[derive(Debug, Parser)]
#[command(name = "heka-cat", about = "Dump a framed Heka message stream", disable_help_flag = true)]
struct Cli {
    #[arg(long = "help", action = clap::ArgAction::Help)]
    help: Option<bool>,

    /// Output the messages in text format (default).
    #[arg(short = 't', action = clap::ArgAction::SetTrue)]
    text: bool,
    /// Only output the message count.
    #[arg(short = 'c', action = clap::ArgAction::SetTrue)]
    count: bool,
    /// Output the messages as a Heka protobuf stream.
    #[arg(short = 'h', long = "heka-out", action = clap::ArgAction::SetTrue)]
    heka: bool,

    /// Output appended data as the file grows.
    #[arg(short = 'f')]
    follow: bool,

    /// Output the last # of messages (approximate, not a precise seek).
    #[arg(short = 'n')]
    last: Option<usize>,

    /// Message matcher expression.
    #[arg(short = 'm', default_value = "TRUE")]
    matcher: String,

    /// File to read, or "-" for stdin.
    file: PathBuf,
}

impl Cli {
    fn mode(&self) -> OutputMode {
        if self.count {
            OutputMode::Count
        } else if self.heka {
            OutputMode::Heka
        } else {
            OutputMode::Text
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mode = cli.mode();
    let node = compile(&cli.matcher).with_context(|| format!("invalid message matcher: {}", cli.matcher))?;

    let use_stdin = cli.file.as_os_str() == "-";
    let mut reader: Box<dyn Read> = if use_stdin {
        Box::new(std::io::stdin())
    } else {
        Box::new(File::open(&cli.file).with_context(|| format!("error opening {}", cli.file.display()))?)
    };

    let mut ib = InputBuffer::new(MAX_MESSAGE_SIZE);
    let mut frames = Vec::new();
    read_all_frames(&mut reader, &mut ib, &mut frames)?;

    // Approximate "last N messages" seek: the C source seeks backward from
    // EOF scanning for frame starts without loading the file, noting in its
    // own comment that the header check "is not 100% accurate" either way.
    // Having already framed the whole stream, dropping all but the trailing
    // N frames gives the same guarantee with simpler code.
    if let Some(n) = cli.last {
        let skip = frames.len().saturating_sub(n);
        frames.drain(..skip);
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut pcnt = 0usize;
    let mut mcnt = 0usize;
    for frame in &frames {
        process_one(frame, &node, mode, &mut out, &mut pcnt, &mut mcnt)?;
    }

    if cli.follow && !use_stdin {
        follow(&mut reader, &mut ib, &node, mode, &mut out, &mut pcnt, &mut mcnt)?;
    }

    summary(mode, pcnt, mcnt);
    Ok(())
}

fn read_all_frames(reader: &mut dyn Read, ib: &mut InputBuffer, frames: &mut Vec<Vec<u8>>) -> Result<()> {
    let mut chunk = [0u8; 64 * 1024];
    loop {
        drain_ready(ib, frames);
        let n = reader.read(&mut chunk).context("error reading input")?;
        if n == 0 {
            drain_ready(ib, frames);
            return Ok(());
        }
        ib.write(&chunk[..n]);
    }
}

fn drain_ready(ib: &mut InputBuffer, frames: &mut Vec<Vec<u8>>) {
    loop {
        let (result, _discarded) = find_message(ib);
        match result {
            FindResult::Found(bytes) => frames.push(bytes),
            FindResult::NeedMoreData => return,
        }
    }
}

fn follow(
    reader: &mut dyn Read,
    ib: &mut InputBuffer,
    node: &Node,
    mode: OutputMode,
    out: &mut impl Write,
    pcnt: &mut usize,
    mcnt: &mut usize,
) -> Result<()> {
    let mut chunk = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut chunk).context("error reading input")?;
        if n == 0 {
            sleep(FOLLOW_POLL);
            continue;
        }
        ib.write(&chunk[..n]);
        loop {
            let (result, _discarded) = find_message(ib);
            match result {
                FindResult::Found(bytes) => process_one(&bytes, node, mode, out, pcnt, mcnt)?,
                FindResult::NeedMoreData => break,
            }
        }
    }
}

fn process_one(
    bytes: &[u8],
    node: &Node,
    mode: OutputMode,
    out: &mut impl Write,
    pcnt: &mut usize,
    mcnt: &mut usize,
) -> Result<()> {
    *pcnt += 1;
    let Ok(msg) = Message::decode(bytes) else {
        return Ok(());
    };
    if !eval(node, &msg) {
        return Ok(());
    }
    *mcnt += 1;
    match mode {
        OutputMode::Text => output_text(&msg, out)?,
        OutputMode::Heka => output_heka(bytes, out)?,
        OutputMode::Count => {}
    }
    Ok(())
}

fn output_heka(bytes: &[u8], out: &mut impl Write) -> Result<()> {
    let mut header = heka_wire::OutputBuffer::new(0);
    heka_wire::protobuf::write_key(&mut header, 1, heka_wire::protobuf::WireType::Varint);
    heka_wire::protobuf::write_varint(&mut header, bytes.len() as u64);
    let header_bytes = header.as_slice();

    out.write_all(&[0x1e, header_bytes.len() as u8])?;
    out.write_all(header_bytes)?;
    out.write_all(&[0x1f])?;
    out.write_all(bytes)?;
    Ok(())
}

fn output_text(msg: &Message<'_>, out: &mut impl Write) -> Result<()> {
    if msg.uuid.len() == 16 {
        let u = msg.uuid;
        writeln!(
            out,
            ":Uuid: {:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            u[0], u[1], u[2], u[3], u[4], u[5], u[6], u[7], u[8], u[9], u[10], u[11], u[12], u[13], u[14], u[15]
        )?;
    } else {
        writeln!(out, ":Uuid: <nil>")?;
    }

    let secs = msg.timestamp.div_euclid(1_000_000_000);
    let nanos = msg.timestamp.rem_euclid(1_000_000_000);
    let datetime = chrono::DateTime::from_timestamp(secs, nanos as u32).unwrap_or_default();
    writeln!(out, ":Timestamp: {}.{:09}Z", datetime.format("%Y-%m-%dT%H:%M:%S"), nanos)?;

    output_cs(out, ":Type", msg.r#type)?;
    output_cs(out, ":Logger", msg.logger)?;
    writeln!(out, ":Severity: {}", msg.severity)?;
    output_cs(out, ":Payload", msg.payload)?;
    output_cs(out, ":EnvVersion", msg.env_version)?;
    if msg.pid == heka_wire::PID_UNSET {
        writeln!(out, ":Pid: <nil>")?;
    } else {
        writeln!(out, ":Pid: {}", msg.pid)?;
    }
    output_cs(out, ":Hostname", msg.hostname)?;

    writeln!(out, ":Fields:")?;
    for field in &msg.fields {
        write!(out, "    | name: {} type: {} ", String::from_utf8_lossy(field.name), value_type_tag(field.value_type))?;
        output_cs_inline(out, "representation", field.representation)?;
        write!(out, " value: ")?;
        let values = field.array_values();
        for (i, v) in values.iter().enumerate() {
            if i > 0 {
                write!(out, "|")?;
            }
            write_field_value(out, v)?;
        }
        writeln!(out)?;
    }
    writeln!(out)?;
    Ok(())
}

fn write_field_value(out: &mut impl Write, v: &FieldValue<'_>) -> Result<()> {
    match v {
        FieldValue::Nil => {}
        FieldValue::Numeric(n) => write!(out, "{n}")?,
        FieldValue::Bool(b) => write!(out, "{}", if *b { "true" } else { "false" })?,
        FieldValue::String(s) => {
            for &byte in *s {
                if byte.is_ascii_graphic() || byte == b' ' {
                    if byte == b'\\' {
                        write!(out, "\\\\")?;
                    } else {
                        out.write_all(&[byte])?;
                    }
                } else {
                    write!(out, "\\x{byte:02x}")?;
                }
            }
        }
    }
    Ok(())
}

fn value_type_tag(t: heka_wire::ValueType) -> i32 {
    match t {
        heka_wire::ValueType::String => 0,
        heka_wire::ValueType::Bytes => 1,
        heka_wire::ValueType::Integer => 2,
        heka_wire::ValueType::Double => 3,
        heka_wire::ValueType::Bool => 4,
    }
}

fn output_cs(out: &mut impl Write, key: &str, value: Option<&[u8]>) -> Result<()> {
    output_cs_inline(out, key, value)?;
    writeln!(out)?;
    Ok(())
}

fn output_cs_inline(out: &mut impl Write, key: &str, value: Option<&[u8]>) -> Result<()> {
    match value {
        Some(s) => write!(out, "{key}: {}", String::from_utf8_lossy(s))?,
        None => write!(out, "{key}: <nil>")?,
    }
    Ok(())
}

fn summary(mode: OutputMode, pcnt: usize, mcnt: usize) {
    let line = format!("Processed: {pcnt}, matched: {mcnt} messages");
    if mode == OutputMode::Count {
        println!("{line}");
    } else {
        eprintln!("{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heka_wire::{FieldInput, FieldValueInput, MessageInput};

    fn fixture() -> Vec<u8> {
        heka_wire::encode(&MessageInput {
            uuid: Some(vec![0xaa; 16]),
            timestamp: Some(1_000_000_001),
            r#type: Some(b"TEST".to_vec()),
            logger: Some(b"mylogger".to_vec()),
            severity: Some(3),
            payload: Some(b"hello world".to_vec()),
            pid: Some(1234),
            hostname: Some(b"box1".to_vec()),
            fields: vec![
                FieldInput { name: b"count".to_vec(), representation: None, value: FieldValueInput::Integer(vec![1, 2, 3]) },
                FieldInput {
                    name: b"name".to_vec(),
                    representation: Some(b"unit".to_vec()),
                    value: FieldValueInput::String(vec![b"bob".to_vec()]),
                },
            ],
            ..Default::default()
        })
    }

    #[test]
    fn text_output_matches_the_expected_field_layout() {
        let bytes = fixture();
        let msg = Message::decode(&bytes).unwrap();
        let mut out = Vec::new();
        output_text(&msg, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with(":Uuid: aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa\n"));
        assert!(text.contains(":Timestamp: 1970-01-01T00:00:01.000000001Z\n"));
        assert!(text.contains(":Type: TEST\n"));
        assert!(text.contains(":Severity: 3\n"));
        assert!(text.contains(":Pid: 1234\n"));
        assert!(text.contains("name: count type: 2 representation: <nil> value: 1|2|3"));
        assert!(text.contains("name: name type: 0 representation: unit value: bob"));
    }

    #[test]
    fn unset_pid_prints_nil() {
        let bytes = heka_wire::encode(&MessageInput { uuid: Some(vec![1; 16]), timestamp: Some(1), ..Default::default() });
        let msg = Message::decode(&bytes).unwrap();
        let mut out = Vec::new();
        output_text(&msg, &mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().contains(":Pid: <nil>\n"));
    }

    #[test]
    fn matcher_filters_out_non_matching_messages() {
        let bytes = fixture();
        let node = compile("Type == 'OTHER'").unwrap();
        let mut out = Vec::new();
        let (mut pcnt, mut mcnt) = (0, 0);
        process_one(&bytes, &node, OutputMode::Count, &mut out, &mut pcnt, &mut mcnt).unwrap();
        assert_eq!(pcnt, 1);
        assert_eq!(mcnt, 0);
    }

    #[test]
    fn heka_passthrough_round_trips_through_the_framer() {
        let bytes = fixture();
        let mut out = Vec::new();
        output_heka(&bytes, &mut out).unwrap();

        let mut ib = InputBuffer::new(MAX_MESSAGE_SIZE);
        ib.write(&out);
        let (result, _discarded) = find_message(&mut ib);
        match result {
            FindResult::Found(found) => assert_eq!(found, bytes),
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[test]
    fn last_n_keeps_only_the_trailing_frames() {
        let mut frames: Vec<Vec<u8>> = (0..5).map(|i| vec![i as u8]).collect();
        let n = 2usize;
        let skip = frames.len().saturating_sub(n);
        frames.drain(..skip);
        assert_eq!(frames, vec![vec![3u8], vec![4u8]]);
    }
}

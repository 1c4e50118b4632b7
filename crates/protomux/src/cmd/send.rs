use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::io::Read;
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::time::Duration;

use bytes::Bytes;
use protomux_mux::{ChannelState, Mux, Pump, Raw};
use tracing::debug;

use crate::cmd::{channel_options, session, SendArgs};
use crate::exit::{io_error, mux_error, CliError, CliResult, FAILURE, SUCCESS, USAGE};
use crate::output::{print_message, MessageSource, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let payload = resolve_payload(&args)?;

    let stream =
        UnixStream::connect(&args.path).map_err(|err| io_error("connect failed", err))?;
    stream
        .set_read_timeout(Some(wait_timeout))
        .map_err(|err| io_error("connect failed", err))?;
    let (mux, mut pump) = session(stream).map_err(|err| io_error("connect failed", err))?;

    let channel =
        mux.create_channel_with(channel_options(&args.protocol, args.discriminator.as_deref()));
    let slot = channel.add_message(Raw);
    let replies: Rc<RefCell<VecDeque<Bytes>>> = Rc::new(RefCell::new(VecDeque::new()));
    let sink = Rc::clone(&replies);
    slot.on_message(move |reply| sink.borrow_mut().push_back(reply));
    channel
        .open()
        .map_err(|err| mux_error("open failed", err))?;

    pump_until(&mut pump, &mux, || channel.state() != ChannelState::Opening)?;
    if !channel.is_open() {
        return Err(CliError::new(
            FAILURE,
            format!("channel '{}' was rejected by the peer", args.protocol),
        ));
    }
    debug!(protocol = %args.protocol, size = payload.len(), "channel paired, sending");

    slot.send(&payload)
        .map_err(|err| mux_error("send failed", err))?;

    if args.wait {
        pump_until(&mut pump, &mux, || {
            !replies.borrow().is_empty() || !channel.is_open()
        })?;
        let reply = replies.borrow_mut().pop_front().ok_or_else(|| {
            CliError::new(FAILURE, "channel closed before a reply arrived")
        })?;
        let peer = mux.transport_id().to_string();
        let source = MessageSource {
            protocol: &args.protocol,
            discriminator: args.discriminator.as_deref().map(str::as_bytes),
            peer: &peer,
        };
        print_message(&source, &reply, format);
    }

    channel
        .close()
        .map_err(|err| mux_error("close failed", err))?;
    Ok(SUCCESS)
}

/// Feed incoming data until `done` holds or the connection ends.
fn pump_until<R: Read>(
    pump: &mut Pump<R>,
    mux: &Mux,
    done: impl Fn() -> bool,
) -> CliResult<()> {
    while !done() {
        let more = pump
            .step(mux)
            .map_err(|err| mux_error("receive failed", err))?;
        if !more {
            break;
        }
    }
    Ok(())
}

fn resolve_payload(args: &SendArgs) -> CliResult<Bytes> {
    if let Some(json) = &args.json {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return Ok(Bytes::from(json.clone().into_bytes()));
    }
    if let Some(data) = &args.data {
        return Ok(Bytes::from(data.clone().into_bytes()));
    }
    if let Some(path) = &args.file {
        return fs::read(path).map(Bytes::from).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), err)
        });
    }
    Ok(Bytes::new())
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

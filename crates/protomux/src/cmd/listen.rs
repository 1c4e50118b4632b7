use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::UnixListener;
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use protomux_mux::Raw;
use tracing::{debug, info, warn};

use crate::cmd::{channel_options, session, ListenArgs};
use crate::exit::{io_error, mux_error, CliError, CliResult, SUCCESS};
use crate::output::{print_message, MessageSource, OutputFormat};

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let listener = bind_socket(&args.path).map_err(|err| io_error("bind failed", err))?;
    info!(path = %args.path.display(), protocol = %args.protocol, "listening");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut printed = 0usize;

    while running.load(Ordering::SeqCst) {
        let (stream, _) = listener
            .accept()
            .map_err(|err| io_error("accept failed", err))?;
        let (mux, mut pump) = session(stream).map_err(|err| io_error("accept failed", err))?;
        let peer = mux.transport_id().to_string();
        debug!(%peer, "connection accepted");

        let channel =
            mux.create_channel_with(channel_options(&args.protocol, args.discriminator.as_deref()));
        let slot = channel.add_message(Raw);
        let inbox: Rc<RefCell<VecDeque<Bytes>>> = Rc::new(RefCell::new(VecDeque::new()));
        let sink = Rc::clone(&inbox);
        slot.on_message(move |payload| sink.borrow_mut().push_back(payload));
        channel
            .open()
            .map_err(|err| mux_error("open failed", err))?;

        let source = MessageSource {
            protocol: &args.protocol,
            discriminator: args.discriminator.as_deref().map(str::as_bytes),
            peer: &peer,
        };

        while running.load(Ordering::SeqCst) {
            // A broken connection ends that session, not the listener.
            let more = pump.step(&mux).unwrap_or_else(|err| {
                warn!(%peer, error = %err, "connection failed");
                false
            });

            let received: Vec<Bytes> = inbox.borrow_mut().drain(..).collect();
            for payload in received {
                print_message(&source, &payload, format);
                printed = printed.saturating_add(1);

                if args.echo && channel.is_open() {
                    slot.send(&payload)
                        .map_err(|err| mux_error("echo failed", err))?;
                }

                if let Some(count) = args.count {
                    if printed >= count {
                        channel
                            .close()
                            .map_err(|err| mux_error("close failed", err))?;
                        return Ok(SUCCESS);
                    }
                }
            }

            if !more || channel.is_closed() {
                debug!(%peer, "connection finished");
                break;
            }
        }
        mux.destroy();
    }

    Ok(SUCCESS)
}

/// Bind `path`, replacing a stale socket but never any other kind of file.
fn bind_socket(path: &Path) -> io::Result<UnixListener> {
    if let Ok(metadata) = std::fs::symlink_metadata(path) {
        if !metadata.file_type().is_socket() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "existing path is not a unix socket",
            ));
        }
        debug!(path = %path.display(), "removing stale socket");
        std::fs::remove_file(path)?;
    }
    UnixListener::bind(path)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}

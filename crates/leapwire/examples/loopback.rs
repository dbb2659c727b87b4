//! Host and script sides of a LEAP exchange over a socket pair, using only
//! the blocking frame reader/writer and the value codec.
//!
//! Run with:
//!   cargo run --example loopback --features logging

#[cfg(unix)]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use std::os::unix::net::UnixStream;
    use std::thread;

    use leapwire::frame::{FrameReader, FrameWriter};
    use leapwire::logging::{init_stderr_logging, LevelFilter};
    use leapwire::value::{self, Map, Value};
    use tracing::info;

    init_stderr_logging(LevelFilter::DEBUG);

    let (script_sock, host_sock) = UnixStream::pair()?;

    let host = thread::spawn(move || -> Result<(), leapwire::frame::FrameError> {
        let mut reader = FrameReader::new(host_sock.try_clone()?);
        let mut writer = FrameWriter::new(host_sock);
        writer.send(b"{'pump':'script-replies','data':{'command':'host-commands','process_id':i1,'args':[]}}")?;

        loop {
            let frame = match reader.read_frame() {
                Ok(frame) => frame,
                Err(leapwire::frame::FrameError::ConnectionClosed) => return Ok(()),
                Err(err) => return Err(err),
            };
            let Ok(request) = value::decode(&frame.payload) else {
                continue;
            };
            let Some(reqid) = request.get("reqid").and_then(Value::as_integer) else {
                continue;
            };
            let data = request.get("data").cloned().unwrap_or_default();
            let reply = format!("{{'pump':'script-replies','data':{data},'reqid':i{reqid}}}");
            writer.send(reply.as_bytes())?;
        }
    });

    let mut reader = FrameReader::new(script_sock.try_clone()?);
    let mut writer = FrameWriter::new(script_sock);

    let welcome = value::decode(&reader.read_frame()?.payload)?;
    info!(%welcome, "welcome");

    let mut envelope = Map::new();
    envelope.insert("pump", "host-commands");
    envelope.insert("data", Map::from_iter([("op", "ping")]));
    envelope.insert("reqid", 1);
    writer.send(&value::encode(&Value::Map(envelope)))?;

    let reply = value::decode(&reader.read_frame()?.payload)?;
    info!(%reply, "reply");

    drop(writer);
    drop(reader);
    host.join().map_err(|_| "host thread panicked")??;
    Ok(())
}

#[cfg(not(unix))]
fn main() {
    eprintln!("the loopback example needs Unix sockets");
}

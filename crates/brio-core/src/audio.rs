use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread;

use anyhow::{Context, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, warn};

/// Custom sounds above this are rejected at input time, before anything is
/// stored.
pub const MAX_SOUND_BYTES: u64 = 2 * 1024 * 1024;

/// The configured alert sound. `Default` means the notification's own
/// built-in alert; custom playback is opt-in via a stored data URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoundRef {
    Default,
    Custom(String),
}

impl SoundRef {
    pub fn from_stored(stored: Option<String>) -> Self {
        match stored {
            Some(reference) if !reference.is_empty() => Self::Custom(reference),
            _ => Self::Default,
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, Self::Default)
    }
}

/// Reads a sound file into a `data:` URI. The size ceiling is checked
/// against file metadata first, so an oversized file is rejected before a
/// single byte is read or stored.
pub fn load_sound_file(path: &Path) -> anyhow::Result<String> {
    let meta = fs::metadata(path)
        .with_context(|| format!("failed to stat sound file {}", path.display()))?;
    if meta.len() > MAX_SOUND_BYTES {
        bail!(
            "sound file is {} bytes; the limit is 2 MiB",
            meta.len()
        );
    }

    let bytes = fs::read(path)
        .with_context(|| format!("failed to read sound file {}", path.display()))?;
    Ok(encode_data_uri(mime_for(path), &bytes))
}

pub fn encode_data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", BASE64.encode(bytes))
}

/// Decodes a stored sound reference back to raw audio bytes. Accepts both
/// full `data:` URIs and bare base64 payloads.
pub fn decode_data_uri(reference: &str) -> anyhow::Result<Vec<u8>> {
    let payload = match reference.split_once("base64,") {
        Some((_, payload)) => payload,
        None if reference.starts_with("data:") => {
            bail!("sound reference is not base64-encoded")
        }
        None => reference,
    };

    BASE64
        .decode(payload.trim())
        .context("invalid base64 in sound reference")
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("ogg" | "oga") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("m4a" | "mp4" | "aac") => "audio/mp4",
        _ => "application/octet-stream",
    }
}

enum SurfaceCmd {
    Play(Vec<u8>),
    Stop,
}

#[derive(Debug)]
struct Surface {
    cmd_tx: Sender<SurfaceCmd>,
}

/// Bridge from the async side to the playback surface. The surface is a
/// dedicated thread owning the audio output; it is reachable only through
/// its command channel, and it is spawned lazily on the first play.
#[derive(Debug, Default)]
pub struct AudioRelay {
    surface: Mutex<Option<Surface>>,
}

impl AudioRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensures the playback surface exists, then forwards a play command,
    /// but only for a custom sound. The default marker leans on the
    /// notification's own alert sound, so nothing is forwarded for it.
    pub async fn play(&self, sound: &SoundRef) -> anyhow::Result<()> {
        let mut guard = self.surface.lock().await;
        ensure_surface(&mut guard).await?;

        let SoundRef::Custom(reference) = sound else {
            return Ok(());
        };
        let bytes = decode_data_uri(reference)?;

        if let Some(surface) = guard.as_ref()
            && surface.cmd_tx.send(SurfaceCmd::Play(bytes)).is_ok()
        {
            return Ok(());
        }

        *guard = None;
        bail!("playback surface is unreachable")
    }

    /// Best-effort stop. An absent or unreachable surface counts as
    /// already stopped; callers must not assume audio has ceased by the
    /// time this returns.
    pub async fn stop(&self) {
        let mut guard = self.surface.lock().await;
        if let Some(surface) = guard.as_ref()
            && surface.cmd_tx.send(SurfaceCmd::Stop).is_err()
        {
            debug!("playback surface gone; treating stop as done");
            *guard = None;
        }
    }
}

/// Idempotent creation: an existing surface is reused. A fresh spawn is
/// not usable until the thread reports its output stream is up, so the
/// ready signal is awaited before the command channel is handed out.
async fn ensure_surface(slot: &mut Option<Surface>) -> anyhow::Result<()> {
    if slot.is_some() {
        return Ok(());
    }

    let (cmd_tx, cmd_rx) = channel();
    let (ready_tx, ready_rx) = oneshot::channel();

    thread::Builder::new()
        .name("brio-playback".to_string())
        .spawn(move || surface_main(cmd_rx, ready_tx))
        .context("failed to spawn playback thread")?;

    match ready_rx.await {
        Ok(Ok(())) => {
            debug!("playback surface ready");
            *slot = Some(Surface { cmd_tx });
            Ok(())
        }
        Ok(Err(msg)) => bail!("playback surface failed to start: {msg}"),
        Err(_) => bail!("playback surface exited before becoming ready"),
    }
}

fn surface_main(cmd_rx: Receiver<SurfaceCmd>, ready_tx: oneshot::Sender<Result<(), String>>) {
    let (stream, handle) = match OutputStream::try_default() {
        Ok(pair) => pair,
        Err(err) => {
            let _ = ready_tx.send(Err(err.to_string()));
            return;
        }
    };
    // Dropping the stream kills the output; it lives as long as the thread.
    let _stream = stream;

    if ready_tx.send(Ok(())).is_err() {
        return;
    }

    let mut active: ActiveSink<Sink> = ActiveSink::new();
    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            SurfaceCmd::Play(bytes) => {
                active.stop();
                match start_sink(&handle, bytes) {
                    Ok(sink) => active.set(sink),
                    Err(err) => warn!(error = %err, "failed to start playback"),
                }
            }
            SurfaceCmd::Stop => active.stop(),
        }
    }

    // Relay dropped its sender; silence anything still playing.
    active.stop();
}

fn start_sink(handle: &OutputStreamHandle, bytes: Vec<u8>) -> anyhow::Result<Sink> {
    let sink = Sink::try_new(handle).context("failed to open playback sink")?;
    let source = Decoder::new(Cursor::new(bytes)).context("unrecognized audio data")?;
    sink.append(source);
    Ok(sink)
}

trait PlaybackHandle {
    fn release(self);
}

impl PlaybackHandle for Sink {
    fn release(self) {
        self.stop();
    }
}

/// At most one active handle, process-wide. A newcomer displaces whatever
/// was playing.
struct ActiveSink<S: PlaybackHandle> {
    current: Option<S>,
}

impl<S: PlaybackHandle> ActiveSink<S> {
    fn new() -> Self {
        Self { current: None }
    }

    fn set(&mut self, sink: S) {
        self.stop();
        self.current = Some(sink);
    }

    fn stop(&mut self) {
        if let Some(sink) = self.current.take() {
            sink.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn stored_reference_maps_to_sound_ref() {
        assert_eq!(SoundRef::from_stored(None), SoundRef::Default);
        assert_eq!(SoundRef::from_stored(Some(String::new())), SoundRef::Default);
        assert_eq!(
            SoundRef::from_stored(Some("data:audio/wav;base64,AAAA".to_string())),
            SoundRef::Custom("data:audio/wav;base64,AAAA".to_string())
        );
    }

    #[test]
    fn data_uri_roundtrip() {
        let bytes = b"RIFF....WAVEfmt ";
        let uri = encode_data_uri("audio/wav", bytes);
        assert!(uri.starts_with("data:audio/wav;base64,"));
        assert_eq!(decode_data_uri(&uri).expect("decodes"), bytes);
    }

    #[test]
    fn bare_base64_payload_decodes() {
        let payload = BASE64.encode(b"abc");
        assert_eq!(decode_data_uri(&payload).expect("decodes"), b"abc");
    }

    #[test]
    fn non_base64_data_uri_is_rejected() {
        assert!(decode_data_uri("data:audio/wav,rawbytes").is_err());
        assert!(decode_data_uri("data:audio/wav;base64,!!!").is_err());
    }

    struct FakeSink {
        released: Rc<Cell<u32>>,
    }

    impl PlaybackHandle for FakeSink {
        fn release(self) {
            self.released.set(self.released.get() + 1);
        }
    }

    #[test]
    fn second_play_displaces_the_first() {
        let released = Rc::new(Cell::new(0));
        let mut active = ActiveSink::new();

        active.set(FakeSink {
            released: Rc::clone(&released),
        });
        assert_eq!(released.get(), 0);

        active.set(FakeSink {
            released: Rc::clone(&released),
        });
        assert_eq!(released.get(), 1, "prior handle must be released first");

        active.stop();
        assert_eq!(released.get(), 2);
    }

    #[test]
    fn stop_without_active_handle_is_a_no_op() {
        let mut active: ActiveSink<FakeSink> = ActiveSink::new();
        active.stop();
        active.stop();
    }
}

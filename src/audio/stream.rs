//! PipeWire plumbing shared by capture and playback sessions

use pipewire as pw;
use pw::spa;
use pw::spa::param::audio::{AudioFormat, AudioInfoRaw};
use pw::spa::param::format::{MediaSubtype, MediaType};
use pw::spa::param::format_utils;
use pw::spa::pod::Pod;

pub(super) const APP_NAME: &str = "Rech Voice Memos";

/// Sent over a `pw::channel` to quit a session's main loop
pub(super) struct Stop;

/// A main loop connected to the PipeWire daemon
pub(super) struct Connection {
    pub mainloop: pw::main_loop::MainLoopRc,
    pub core: pw::core::CoreRc,
    _context: pw::context::ContextRc,
}

impl Connection {
    pub fn open() -> Result<Self, String> {
        pw::init();

        let mainloop = pw::main_loop::MainLoopRc::new(None)
            .map_err(|e| format!("PipeWire main loop unavailable: {}", e))?;
        let context = pw::context::ContextRc::new(&mainloop, None)
            .map_err(|e| format!("PipeWire context unavailable: {}", e))?;
        let core = context
            .connect_rc(None)
            .map_err(|e| format!("Cannot reach the PipeWire daemon: {}", e))?;

        Ok(Self {
            mainloop,
            core,
            _context: context,
        })
    }

    /// Create an audio stream tagged with the given category and role
    pub fn stream(
        &self,
        name: &str,
        category: &str,
        role: &str,
    ) -> Result<pw::stream::StreamBox<'_>, String> {
        let props = pw::properties::properties! {
            *pw::keys::MEDIA_TYPE => "Audio",
            *pw::keys::MEDIA_CATEGORY => category,
            *pw::keys::MEDIA_ROLE => role,
            *pw::keys::APP_NAME => APP_NAME,
        };

        pw::stream::StreamBox::new(&self.core, name, props)
            .map_err(|e| format!("Cannot create stream {}: {}", name, e))
    }
}

/// Record a newly negotiated raw audio format; returns whether `format` changed
pub(super) fn update_format(format: &mut AudioInfoRaw, id: u32, param: Option<&Pod>) -> bool {
    let Some(param) = param else { return false };
    if id != spa::param::ParamType::Format.as_raw() {
        return false;
    }

    match format_utils::parse_format(param) {
        Ok((MediaType::Audio, MediaSubtype::Raw)) => format.parse(param).is_ok(),
        _ => false,
    }
}

/// Serialize an F32LE format request; PipeWire converts to and from the device
fn format_request(rate: u32, channels: u32) -> Result<Vec<u8>, String> {
    let mut info = AudioInfoRaw::new();
    info.set_format(AudioFormat::F32LE);
    info.set_rate(rate);
    info.set_channels(channels);

    let object = spa::pod::Object {
        type_: spa::utils::SpaTypes::ObjectParamFormat.as_raw(),
        id: spa::param::ParamType::EnumFormat.as_raw(),
        properties: info.into(),
    };

    Ok(spa::pod::serialize::PodSerializer::serialize(
        std::io::Cursor::new(Vec::new()),
        &spa::pod::Value::Object(object),
    )
    .map_err(|e| format!("Cannot encode format request: {:?}", e))?
    .0
    .into_inner())
}

/// Connect `stream` to the default device in `direction`
pub(super) fn connect(
    stream: &pw::stream::StreamBox<'_>,
    direction: spa::utils::Direction,
    rate: u32,
    channels: u32,
) -> Result<(), String> {
    let request = format_request(rate, channels)?;
    let pod = Pod::from_bytes(&request).ok_or("Format request is not a valid pod")?;
    let mut params = [pod];

    stream
        .connect(
            direction,
            None,
            pw::stream::StreamFlags::AUTOCONNECT
                | pw::stream::StreamFlags::MAP_BUFFERS
                | pw::stream::StreamFlags::RT_PROCESS,
            &mut params,
        )
        .map_err(|e| format!("Cannot connect stream: {}", e))
}

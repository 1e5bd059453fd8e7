use crate::audio::PcmClip;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("unreadable audio: {0}")]
    Symphonia(#[from] SymphoniaError),

    #[error("no decodable audio track")]
    NoAudioTrack,

    #[error("clip decoded to zero samples")]
    Empty,

    #[error("invalid audio format: {0}")]
    InvalidFormat(String),
}

/// Decodes one container-encoded clip into PCM.
pub trait ClipDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<PcmClip, DecodeError>;
}

/// MP3 decoding through symphonia.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymphoniaMp3Decoder;

impl ClipDecoder for SymphoniaMp3Decoder {
    fn decode(&self, bytes: &[u8]) -> Result<PcmClip, DecodeError> {
        let source = std::io::Cursor::new(bytes.to_vec());
        let mss = MediaSourceStream::new(Box::new(source), Default::default());

        let mut hint = Hint::new();
        hint.with_extension("mp3");

        let probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoAudioTrack)?;
        let track_id = track.id;
        let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
        let mut channels = track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(0);

        let mut decoder =
            symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

        let mut samples = Vec::new();
        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break
                }
                Err(e) => return Err(e.into()),
            };
            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    sample_rate = spec.rate;
                    channels = spec.channels.count() as u16;
                    let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    buf.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buf.samples());
                }
                // A corrupt frame only costs that frame.
                Err(SymphoniaError::DecodeError(reason)) => {
                    tracing::debug!(reason, "skipping undecodable mp3 frame");
                }
                Err(e) => return Err(e.into()),
            }
        }

        if sample_rate == 0 || channels == 0 {
            return Err(DecodeError::InvalidFormat(format!(
                "sample_rate={sample_rate} channels={channels}"
            )));
        }
        if samples.is_empty() {
            return Err(DecodeError::Empty);
        }

        Ok(PcmClip::new(sample_rate, channels, samples))
    }
}

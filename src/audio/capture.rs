use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::traits::Producer;
use ringbuf::HeapProd;
use tracing::{debug, error, info};

use crate::config::CaptureConfig;
use crate::error::{Result, VoiceError};

/// What the session asks of the input device.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConstraints {
    pub sample_rate: u32,
    pub channels: u16,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl From<&CaptureConfig> for CaptureConstraints {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: 1,
            echo_cancellation: config.echo_cancellation,
            noise_suppression: config.noise_suppression,
            auto_gain_control: config.auto_gain_control,
        }
    }
}

/// Microphone device API. Acquiring a stream is the permission point.
pub trait Microphone {
    /// Open (but do not start) an input stream that writes mono samples into
    /// `producer`. The callback side must never block.
    fn request_stream(
        &mut self,
        constraints: &CaptureConstraints,
        producer: HeapProd<f32>,
    ) -> Result<Box<dyn InputStream>>;

    /// Rate the next stream will deliver, used to size the ring buffer.
    fn preferred_rate(&self, constraints: &CaptureConstraints) -> u32 {
        constraints.sample_rate
    }
}

/// A live input stream. Dropping it releases the device.
pub trait InputStream {
    fn sample_rate(&self) -> u32;
    fn play(&mut self) -> Result<()>;
    fn stop(&mut self);
}

/// Default-device microphone backed by cpal.
#[derive(Debug, Default)]
pub struct CpalMicrophone;

impl CpalMicrophone {
    pub fn new() -> Self {
        Self
    }

    fn select_config(device: &cpal::Device, wanted: u32) -> Result<(cpal::SupportedStreamConfig, u32)> {
        // Prefer the requested rate, then the VAD-friendly rates, then the device default.
        let mut target_rates = vec![wanted];
        target_rates.extend(crate::config::VAD_RATES.iter().copied().filter(|&r| r != wanted));

        for &rate in &target_rates {
            let configs = device
                .supported_input_configs()
                .map_err(|e| VoiceError::Permission(e.to_string()))?;
            for range in configs {
                let format_ok = matches!(range.sample_format(), cpal::SampleFormat::F32 | cpal::SampleFormat::I16);
                if format_ok && range.min_sample_rate().0 <= rate && range.max_sample_rate().0 >= rate {
                    return Ok((range.with_sample_rate(cpal::SampleRate(rate)), rate));
                }
            }
        }

        let default = device
            .default_input_config()
            .map_err(|e| VoiceError::Permission(e.to_string()))?;
        let rate = default.sample_rate().0;
        Ok((default, rate))
    }
}

impl Microphone for CpalMicrophone {
    fn preferred_rate(&self, constraints: &CaptureConstraints) -> u32 {
        cpal::default_host()
            .default_input_device()
            .and_then(|device| Self::select_config(&device, constraints.sample_rate).ok())
            .map_or(constraints.sample_rate, |(_, rate)| rate)
    }

    fn request_stream(
        &mut self,
        constraints: &CaptureConstraints,
        mut producer: HeapProd<f32>,
    ) -> Result<Box<dyn InputStream>> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| VoiceError::Permission("No input device available".into()))?;

        info!("Audio Input Device: {}", device.name().unwrap_or_default());
        if constraints.echo_cancellation || constraints.noise_suppression || constraints.auto_gain_control {
            debug!("Host does not apply echo cancellation / noise suppression / auto gain; capturing raw");
        }

        let (config, rate) = Self::select_config(&device, constraints.sample_rate)?;
        let channels = config.channels().max(1) as usize;
        info!("Audio Config Selected: Rate={}Hz, Channels={}", rate, channels);

        let err_fn = |err| error!("an error occurred on input stream: {}", err);

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => device.build_input_stream(
                &config.into(),
                move |data: &[f32], _: &_| write_input_data(data, channels, &mut producer),
                err_fn,
                None,
            ),
            cpal::SampleFormat::I16 => device.build_input_stream(
                &config.into(),
                move |data: &[i16], _: &_| write_input_data_i16(data, channels, &mut producer),
                err_fn,
                None,
            ),
            other => {
                return Err(VoiceError::Device(format!("Unsupported sample format {other:?}")));
            }
        }
        .map_err(|e| VoiceError::Permission(e.to_string()))?;

        Ok(Box::new(CpalInputStream { stream: Some(stream), sample_rate: rate }))
    }
}

struct CpalInputStream {
    stream: Option<cpal::Stream>,
    sample_rate: u32,
}

impl InputStream for CpalInputStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn play(&mut self) -> Result<()> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| VoiceError::InvalidState("input stream already released".into()))?;
        stream.play().map_err(|e| VoiceError::Device(e.to_string()))
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                debug!("pausing input stream failed: {}", e);
            }
        }
    }
}

fn write_input_data<P>(input: &[f32], channels: usize, producer: &mut P)
where
    P: Producer<Item = f32>,
{
    // Lossy when the ring is full; the pump is behind and stale audio is useless.
    if channels == 1 {
        producer.push_slice(input);
        return;
    }
    for frame in input.chunks(channels) {
        let _ = producer.try_push(frame.iter().sum::<f32>() / frame.len() as f32);
    }
}

fn write_input_data_i16<P>(input: &[i16], channels: usize, producer: &mut P)
where
    P: Producer<Item = f32>,
{
    for frame in input.chunks(channels) {
        let sum: f32 = frame.iter().map(|&s| s as f32 / i16::MAX as f32).sum();
        let _ = producer.try_push(sum / frame.len() as f32);
    }
}

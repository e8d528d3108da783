use bard_ports::audio::{AudioError, AudioOutputPort, AudioRenderCallback, AudioStreamHandle};
use bard_ports::types::{AudioConfig, AudioOutputDevice, DeviceId};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, FromSample, SampleFormat, SampleRate, SizedSample, StreamConfig,
    SupportedStreamConfigRange,
};
use std::sync::mpsc;
use std::thread;

pub struct CpalAudioOutputPort {
    host: cpal::Host,
}

struct SelectedStreamConfig {
    config: StreamConfig,
    sample_format: SampleFormat,
}

impl CpalAudioOutputPort {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
        }
    }

    pub fn with_host(host: cpal::Host) -> Self {
        Self { host }
    }

    fn list_devices_from_host(
        host: &cpal::Host,
    ) -> Result<Vec<(DeviceId, cpal::Device)>, AudioError> {
        let host_id = format!("{:?}", host.id());
        let devices = host
            .output_devices()
            .map_err(|e| AudioError::Backend(e.to_string()))?;

        let mut list = Vec::new();
        for (index, device) in devices.enumerate() {
            let name = device
                .name()
                .unwrap_or_else(|_| "Unknown Output".to_string());
            let id = DeviceId(format!("cpal:{}:{}:{}", host_id, index, name));
            list.push((id, device));
        }

        Ok(list)
    }

    fn select_stream_config(
        device: &cpal::Device,
        desired: AudioConfig,
    ) -> Result<SelectedStreamConfig, AudioError> {
        let mut supported = device
            .supported_output_configs()
            .map_err(|e| AudioError::Backend(e.to_string()))?;

        let chosen = select_supported_config(&mut supported, desired)?;

        let sample_format = chosen.sample_format();
        let mut config = chosen.config();

        config.buffer_size = match desired.buffer_size_frames {
            Some(frames) => BufferSize::Fixed(frames),
            None => BufferSize::Default,
        };

        Ok(SelectedStreamConfig {
            config,
            sample_format,
        })
    }
}

impl Default for CpalAudioOutputPort {
    fn default() -> Self {
        Self::new()
    }
}

/// The cpal stream lives on its own thread (it is not `Send` on every
/// platform); closing the handle stops and joins that thread.
pub struct CpalAudioStreamHandle {
    stop_tx: mpsc::Sender<()>,
    join_handle: Option<thread::JoinHandle<()>>,
}

impl AudioStreamHandle for CpalAudioStreamHandle {
    fn close(mut self: Box<Self>) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }
}

impl AudioOutputPort for CpalAudioOutputPort {
    fn list_outputs(&self) -> Result<Vec<AudioOutputDevice>, AudioError> {
        let devices = Self::list_devices_from_host(&self.host)?;
        Ok(devices
            .into_iter()
            .filter_map(|(id, device)| describe_device(id, &device))
            .collect())
    }

    fn default_output(&self) -> Result<Option<AudioOutputDevice>, AudioError> {
        let Some(default_device) = self.host.default_output_device() else {
            return Ok(None);
        };
        let default_name = default_device.name().ok();
        let devices = Self::list_devices_from_host(&self.host)?;
        Ok(devices
            .into_iter()
            .find(|(_, device)| device.name().ok() == default_name)
            .and_then(|(id, device)| describe_device(id, &device)))
    }

    fn open_output(
        &self,
        device_id: &DeviceId,
        config: AudioConfig,
        cb: Box<dyn AudioRenderCallback>,
    ) -> Result<Box<dyn AudioStreamHandle>, AudioError> {
        let device_id = device_id.clone();
        let desired = config;
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let join_handle = thread::spawn(move || {
            let host = cpal::default_host();
            let device = match Self::list_devices_from_host(&host).and_then(|devices| {
                devices
                    .into_iter()
                    .find(|(id, _)| id == &device_id)
                    .map(|(_, device)| device)
                    .ok_or_else(|| AudioError::DeviceNotFound(device_id.to_string()))
            }) {
                Ok(device) => device,
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };

            let selected = match Self::select_stream_config(&device, desired) {
                Ok(config) => config,
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };

            let stream = match selected.sample_format {
                SampleFormat::F32 => build_stream::<f32>(&device, &selected.config, cb),
                SampleFormat::I16 => build_stream::<i16>(&device, &selected.config, cb),
                SampleFormat::U16 => build_stream::<u16>(&device, &selected.config, cb),
                other => Err(AudioError::UnsupportedConfig(format!(
                    "sample format {other:?}"
                ))),
            };

            let stream = match stream {
                Ok(stream) => stream,
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };

            if let Err(err) = stream.play() {
                let _ = ready_tx.send(Err(AudioError::Backend(err.to_string())));
                return;
            }

            let _ = ready_tx.send(Ok(()));
            let _ = stop_rx.recv();
            drop(stream);
        });

        match ready_rx
            .recv()
            .map_err(|e| AudioError::Backend(e.to_string()))?
        {
            Ok(()) => Ok(Box::new(CpalAudioStreamHandle {
                stop_tx,
                join_handle: Some(join_handle),
            })),
            Err(err) => Err(err),
        }
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut cb: Box<dyn AudioRenderCallback>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let initial_frames = match config.buffer_size {
        BufferSize::Fixed(frames) => frames as usize,
        BufferSize::Default => 8192,
    };
    let mut left: Vec<f32> = vec![0.0; initial_frames];
    let mut right: Vec<f32> = vec![0.0; initial_frames];
    let mut sample_time: u64 = 0;

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _info: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels.max(1);
                if frames > left.len() {
                    left.resize(frames, 0.0);
                    right.resize(frames, 0.0);
                }
                cb.render(sample_time, &mut left[..frames], &mut right[..frames]);
                write_interleaved(data, channels, &left[..frames], &right[..frames]);
                sample_time = sample_time.saturating_add(frames as u64);
            },
            |err| {
                tracing::error!("cpal stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::Backend(e.to_string()))
}

fn describe_device(id: DeviceId, device: &cpal::Device) -> Option<AudioOutputDevice> {
    let name = device
        .name()
        .unwrap_or_else(|_| "Unknown Output".to_string());
    let default_config = device.default_output_config().ok()?;
    Some(AudioOutputDevice {
        id,
        name,
        default_config: AudioConfig {
            sample_rate_hz: default_config.sample_rate().0,
            channels: default_config.channels(),
            buffer_size_frames: None,
        },
    })
}

fn select_supported_config(
    supported: &mut dyn Iterator<Item = SupportedStreamConfigRange>,
    desired: AudioConfig,
) -> Result<cpal::SupportedStreamConfig, AudioError> {
    let mut best: Option<cpal::SupportedStreamConfig> = None;
    let mut best_score: i32 = -1;

    for config_range in supported {
        if config_range.channels() != desired.channels {
            continue;
        }
        let min = config_range.min_sample_rate().0;
        let max = config_range.max_sample_rate().0;
        if desired.sample_rate_hz < min || desired.sample_rate_hz > max {
            continue;
        }

        let score = match config_range.sample_format() {
            SampleFormat::F32 => 3,
            SampleFormat::I16 => 2,
            SampleFormat::U16 => 1,
            _ => continue,
        };

        if score > best_score {
            best = Some(config_range.with_sample_rate(SampleRate(desired.sample_rate_hz)));
            best_score = score;
        }
    }

    best.ok_or_else(|| AudioError::UnsupportedConfig("no matching stream config".to_string()))
}

/// Writes split stereo into an interleaved device buffer: mono devices get
/// the average, extra channels get silence.
fn write_interleaved<T>(data: &mut [T], channels: usize, left: &[f32], right: &[f32])
where
    T: SizedSample + FromSample<f32>,
{
    if channels == 0 {
        return;
    }
    for (frame, out) in data.chunks_mut(channels).enumerate() {
        let l = left.get(frame).copied().unwrap_or(0.0).clamp(-1.0, 1.0);
        let r = right.get(frame).copied().unwrap_or(0.0).clamp(-1.0, 1.0);
        if channels == 1 {
            out[0] = T::from_sample((l + r) * 0.5);
            continue;
        }
        for (ch, sample) in out.iter_mut().enumerate() {
            *sample = match ch {
                0 => T::from_sample(l),
                1 => T::from_sample(r),
                _ => T::EQUILIBRIUM,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpal::SupportedBufferSize;

    fn range(channels: u16, format: SampleFormat) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            channels,
            SampleRate(8_000),
            SampleRate(96_000),
            SupportedBufferSize::Unknown,
            format,
        )
    }

    #[test]
    fn prefers_float_output_with_matching_channels() {
        let desired = AudioConfig {
            sample_rate_hz: 44_100,
            channels: 2,
            buffer_size_frames: None,
        };
        let mut configs = vec![
            range(2, SampleFormat::I16),
            range(1, SampleFormat::F32),
            range(2, SampleFormat::F32),
        ]
        .into_iter();

        let chosen = select_supported_config(&mut configs, desired).expect("config");
        assert_eq!(chosen.sample_format(), SampleFormat::F32);
        assert_eq!(chosen.channels(), 2);
        assert_eq!(chosen.sample_rate().0, 44_100);
    }

    #[test]
    fn rejects_when_rate_out_of_range() {
        let desired = AudioConfig {
            sample_rate_hz: 192_000,
            channels: 2,
            buffer_size_frames: None,
        };
        let mut configs = vec![range(2, SampleFormat::F32)].into_iter();
        assert!(matches!(
            select_supported_config(&mut configs, desired),
            Err(AudioError::UnsupportedConfig(_))
        ));
    }

    #[test]
    fn interleaves_mono_and_pads_extra_channels() {
        let left = [1.0, 0.0];
        let right = [0.0, 1.0];

        let mut mono = [9.0_f32; 2];
        write_interleaved(&mut mono, 1, &left, &right);
        assert_eq!(mono, [0.5, 0.5]);

        let mut quad = [9.0_f32; 8];
        write_interleaved(&mut quad, 4, &left, &right);
        assert_eq!(quad, [1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
    }
}

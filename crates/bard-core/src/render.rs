use crate::audio_params::AudioParams;
use crate::buffer_pool::BufferPool;
use crate::contract::contract_violation;
use crate::settings::RenderConfig;
use bard_ports::audio::AudioSink;
use bard_ports::synth::{NoteSynthesizer, SynthError};
use bard_ports::types::PcmBuffer;
use rtrb::Consumer;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One accepted note-on waiting for its buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderRequest {
    pub note: u8,
    pub velocity: u8,
    pub at: Instant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderOutcome {
    Rendered,
    /// Pool exhausted; the note is skipped.
    Starved,
    /// No bank loaded or the synth refused to render.
    Silent,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub rendered: u64,
    pub starved: u64,
    pub checked_out: usize,
}

/// Cross-thread handle on a pipeline that lives on the audio thread.
#[derive(Debug, Default)]
pub struct PipelineControl {
    flush_requested: AtomicBool,
    rendered: AtomicU64,
    starved: AtomicU64,
    checked_out: AtomicUsize,
}

impl PipelineControl {
    /// Asks the pipeline to drop pending work and return every held buffer
    /// on its next `process`.
    pub fn request_flush(&self) {
        self.flush_requested.store(true, Ordering::Release);
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            rendered: self.rendered.load(Ordering::Relaxed),
            starved: self.starved.load(Ordering::Relaxed),
            checked_out: self.checked_out.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
struct HeldBuffer {
    buffer: PcmBuffer,
    release_at: Instant,
}

/// Turns render requests into faded PCM buffers for the sink.
///
/// Owned by the audio thread. `process` never allocates: the pool and the
/// held list are sized up front and requests arrive over a ring.
pub struct RenderPipeline {
    synth: Arc<dyn NoteSynthesizer>,
    sink: Arc<dyn AudioSink>,
    params: Arc<AudioParams>,
    pool: BufferPool,
    requests: Consumer<RenderRequest>,
    held: Vec<HeldBuffer>,
    control: Arc<PipelineControl>,
    fade_frames: usize,
    hold: Duration,
    priority: u8,
    starving: bool,
    render_failing: bool,
}

impl RenderPipeline {
    pub fn new(
        config: &RenderConfig,
        pool_capacity: usize,
        synth: Arc<dyn NoteSynthesizer>,
        sink: Arc<dyn AudioSink>,
        params: Arc<AudioParams>,
        requests: Consumer<RenderRequest>,
    ) -> Self {
        let pool = BufferPool::new(
            pool_capacity,
            config.frames_per_buffer(),
            config.channels,
            config.sample_rate_hz,
        );
        Self {
            synth,
            sink,
            params,
            held: Vec::with_capacity(pool.capacity()),
            pool,
            requests,
            control: Arc::new(PipelineControl::default()),
            fade_frames: config.fade_samples,
            hold: config.hold(),
            priority: config.priority,
            starving: false,
            render_failing: false,
        }
    }

    pub fn control(&self) -> Arc<PipelineControl> {
        self.control.clone()
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    /// One audio-thread pass: honour a flush, reclaim expired buffers, then
    /// render every pending request.
    pub fn process(&mut self, now: Instant) {
        if self.control.flush_requested.swap(false, Ordering::AcqRel) {
            self.flush();
        }
        self.reclaim(now);
        while let Ok(request) = self.requests.pop() {
            // The hold window runs from the trigger, not from this pass.
            if self.render_note(request.at.min(now)) == RenderOutcome::Starved {
                tracing::debug!(
                    note = request.note,
                    velocity = request.velocity,
                    "note skipped, no free buffer"
                );
            }
        }
        self.publish_checked_out();
    }

    pub fn render_note(&mut self, now: Instant) -> RenderOutcome {
        if !self.synth.is_loaded() {
            return RenderOutcome::Silent;
        }

        let Some(mut buffer) = self.pool.acquire() else {
            if !self.starving {
                tracing::warn!(
                    capacity = self.pool.capacity(),
                    "buffer pool exhausted, skipping note"
                );
            }
            self.starving = true;
            self.control.starved.fetch_add(1, Ordering::Relaxed);
            return RenderOutcome::Starved;
        };
        self.starving = false;

        buffer.clear();
        if let Err(err) = self.synth.render(&mut buffer) {
            self.report_render_error(&err);
            self.return_to_pool(buffer);
            return RenderOutcome::Silent;
        }
        self.render_failing = false;

        let channels = buffer.channels() as usize;
        apply_fades(buffer.samples_mut(), channels, self.fade_frames);
        self.sink.play(&buffer, self.priority, self.params.volume());

        self.held.push(HeldBuffer {
            buffer,
            release_at: now + self.hold,
        });
        self.control.rendered.fetch_add(1, Ordering::Relaxed);
        RenderOutcome::Rendered
    }

    /// Returns every buffer whose hold window has passed.
    pub fn reclaim(&mut self, now: Instant) -> usize {
        let mut reclaimed = 0;
        let mut idx = 0;
        while idx < self.held.len() {
            if self.held[idx].release_at <= now {
                let held = self.held.swap_remove(idx);
                self.return_to_pool(held.buffer);
                reclaimed += 1;
            } else {
                idx += 1;
            }
        }
        reclaimed
    }

    /// Force-returns all held buffers, drops pending requests and silences the sink.
    pub fn flush(&mut self) {
        while let Some(held) = self.held.pop() {
            self.return_to_pool(held.buffer);
        }
        while self.requests.pop().is_ok() {}
        self.sink.stop_all();
        self.publish_checked_out();
    }

    fn return_to_pool(&mut self, buffer: PcmBuffer) {
        if let Err(err) = self.pool.release(buffer) {
            contract_violation("render pipeline returned a foreign buffer", &err);
        }
    }

    fn report_render_error(&mut self, err: &SynthError) {
        if self.render_failing {
            return;
        }
        self.render_failing = true;
        tracing::warn!(error = %err, "synthesizer render failed, note skipped");
    }

    fn publish_checked_out(&self) {
        self.control
            .checked_out
            .store(self.pool.checked_out(), Ordering::Relaxed);
    }
}

/// Linear fade-in over the first `fade_frames` frames and fade-out over the
/// last ones. Frame `i` of the head and frame `frames - 1 - i` of the tail
/// are scaled by `i / fade_frames`. The fade is clamped to half the buffer.
pub fn apply_fades(samples: &mut [f32], channels: usize, fade_frames: usize) {
    let channels = channels.max(1);
    let frames = samples.len() / channels;
    let fade = fade_frames.min(frames / 2);
    if fade == 0 {
        return;
    }

    for i in 0..fade {
        let gain = i as f32 / fade as f32;
        let head = i * channels;
        for sample in &mut samples[head..head + channels] {
            *sample *= gain;
        }
        let tail = (frames - 1 - i) * channels;
        for sample in &mut samples[tail..tail + channels] {
            *sample *= gain;
        }
    }
}

use crate::model::{TempoPoint, Tick};
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct TempoMap {
    ppq: u16,
    segments: Vec<TempoSegment>,
}

#[derive(Clone, Copy, Debug)]
struct TempoSegment {
    start_tick: Tick,
    start_us: i64,
    us_per_quarter: u32,
}

impl TempoMap {
    pub fn new(ppq: u16, mut points: Vec<TempoPoint>) -> Self {
        let ppq = ppq.max(1);
        points.sort_by_key(|p| p.tick);
        if points.is_empty() || points[0].tick != 0 {
            points.insert(
                0,
                TempoPoint {
                    tick: 0,
                    us_per_quarter: 500_000,
                },
            );
        }

        let mut segments = Vec::with_capacity(points.len());
        let mut current_us = 0i64;
        for (idx, point) in points.iter().enumerate() {
            if idx > 0 {
                let prev = &points[idx - 1];
                let delta_ticks = point.tick - prev.tick;
                current_us += ticks_to_us(delta_ticks, prev.us_per_quarter, ppq);
            }
            segments.push(TempoSegment {
                start_tick: point.tick,
                start_us: current_us,
                us_per_quarter: point.us_per_quarter.max(1),
            });
        }

        Self { ppq, segments }
    }

    pub fn tick_to_micros(&self, tick: Tick) -> i64 {
        let seg = self.segment_for_tick(tick);
        let delta_ticks = tick - seg.start_tick;
        seg.start_us + ticks_to_us(delta_ticks, seg.us_per_quarter, self.ppq)
    }

    pub fn tick_to_offset(&self, tick: Tick) -> Duration {
        let micros = self.tick_to_micros(tick).max(0);
        Duration::from_micros(micros as u64)
    }

    fn segment_for_tick(&self, tick: Tick) -> TempoSegment {
        let mut current = self.segments[0];
        for seg in &self.segments {
            if seg.start_tick > tick {
                break;
            }
            current = *seg;
        }
        current
    }
}

fn ticks_to_us(ticks: Tick, us_per_quarter: u32, ppq: u16) -> i64 {
    let ticks = ticks as i128;
    let us_per_quarter = us_per_quarter as i128;
    let ppq = ppq as i128;
    ((ticks * us_per_quarter) / ppq) as i64
}

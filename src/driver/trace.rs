use crate::prelude::*;
use crate::worker::{PhaseTimings, WorkerReport};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Per-phase wall-clock seconds of one worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
struct PhaseSeconds {
    setup: f64,
    ingest: f64,
    halo: f64,
    convolve: f64,
    assembly: f64,
    total: f64,
}

/// Words per trace entry: id, position, tile shape, start index and five phase timings.
pub(super) const TRACE_WORDS: usize = 11;

/// One line of the trace. Travels to the coordinator as a fixed number of words.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(super) struct TraceEntry {
    worker: usize,
    position: [usize; 2],
    tile: [usize; 2],
    start_index: usize,
    timings: PhaseSeconds,
}

impl TraceEntry {
    pub(super) fn words_of<S>(report: &WorkerReport<S>) -> [u64; TRACE_WORDS] {
        let [setup, ingest, halo, convolve, assembly] = report.timings.to_micros();

        [
            report.id.get() as u64,
            report.position.col as u64,
            report.position.row as u64,
            report.tile.width as u64,
            report.tile.height as u64,
            report.start_index as u64,
            setup,
            ingest,
            halo,
            convolve,
            assembly,
        ]
    }

    pub(super) fn from_words(words: &[u64]) -> Self {
        let w = |i: usize| words[i] as usize;
        let mut micros = [0; 5];
        micros.copy_from_slice(&words[6..TRACE_WORDS]);
        let t = PhaseTimings::from_micros(micros);

        Self {
            worker: w(0),
            position: [w(1), w(2)],
            tile: [w(3), w(4)],
            start_index: w(5),
            timings: PhaseSeconds {
                setup: t.setup.as_secs_f64(),
                ingest: t.ingest.as_secs_f64(),
                halo: t.halo.as_secs_f64(),
                convolve: t.convolve.as_secs_f64(),
                assembly: t.assembly.as_secs_f64(),
                total: t.total().as_secs_f64(),
            },
        }
    }
}

/// JSON-lines file with one object per worker of a run.
#[derive(Debug)]
pub(super) struct RunTrace {
    file: BufWriter<File>,
}

impl RunTrace {
    pub(super) fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("writing trace to: {:?}", path);

        let file = File::create(path).with_context(|| format!("failed to create {:?}", path))?;
        Ok(Self {
            file: BufWriter::new(file),
        })
    }

    pub(super) fn add(&mut self, entry: &TraceEntry) {
        if let Err(e) = serde_json::to_writer(&mut self.file, entry) {
            warn!("writing trace failed: {}", e);
        }

        let _ = self.file.write_all(b"\n");
    }

    pub(super) fn finish(mut self) -> Result {
        self.file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::{Extent, GridPos, WorkerId};
    use std::time::Duration;

    #[test]
    fn test_entry_from_report() {
        let report = WorkerReport::<u8> {
            id: WorkerId::new(5),
            position: GridPos::new(2, 1),
            tile: Extent::new(4, 3),
            start_index: 47,
            timings: PhaseTimings {
                halo: Duration::from_millis(250),
                ..default()
            },
            image: None,
        };

        let entry = TraceEntry::from_words(&TraceEntry::words_of(&report));
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["worker"], 5);
        assert_eq!(json["position"], serde_json::json!([2, 1]));
        assert_eq!(json["tile"], serde_json::json!([4, 3]));
        assert_eq!(json["start_index"], 47);
        assert_eq!(json["timings"]["halo"], 0.25);
        assert_eq!(json["timings"]["total"], 0.25);
    }
}

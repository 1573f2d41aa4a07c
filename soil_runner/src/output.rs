// Per-step CSV files.
//
// `CsvSink` is the run's step observer. For every applied step it writes
// four files into the output directory, named by the zero-padded step index:
//
//   terrain_00042.csv     x,y,z of every cell centre
//   body_soil_00042.csv   one row per carried parcel
//   layers_00042.csv      disturbed layers with provenance
//   bucket_00042.csv      the six bucket corners
//
// A write error stops the run after the current step; the error is kept
// and handed back by `finish`.

use std::io;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use soil_sim::evolution::{StepObserver, StepReport};
use soil_sim::snapshot::{Snapshot, to_table};

pub struct CsvSink {
    dir: PathBuf,
    written: usize,
    error: Option<io::Error>,
}

impl CsvSink {
    /// Create the directory if needed.
    pub fn new(dir: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            written: 0,
            error: None,
        })
    }

    /// Steps written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn finish(self) -> io::Result<usize> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.written),
        }
    }

    fn write_step(&self, step: u64, snapshot: &Snapshot) -> io::Result<()> {
        let files = [
            ("terrain", to_table(&snapshot.terrain)),
            ("body_soil", to_table(&snapshot.body_soil)),
            ("layers", to_table(&snapshot.layers)),
            ("bucket", to_table(snapshot.bucket.as_slice())),
        ];
        for (name, table) in files {
            std::fs::write(self.dir.join(format!("{name}_{step:05}.csv")), table)?;
        }
        Ok(())
    }
}

impl StepObserver for CsvSink {
    fn on_step(&mut self, report: &StepReport, snapshot: Option<&Snapshot>) -> ControlFlow<()> {
        let Some(snapshot) = snapshot else {
            return ControlFlow::Continue(());
        };
        match self.write_step(report.step, snapshot) {
            Ok(()) => {
                self.written += 1;
                ControlFlow::Continue(())
            }
            Err(e) => {
                log::error!("writing step {} to {}: {e}", report.step, self.dir.display());
                self.error = Some(e);
                ControlFlow::Break(())
            }
        }
    }
}

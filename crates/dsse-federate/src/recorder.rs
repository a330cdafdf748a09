//! Recorder federate and post-run analysis of its output.
//!
//! Recordings are JSON lines, one [`MeasurementArray`] per received update.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::NaiveDateTime;
use dsse_algo::{error_table, ErrorTable};
use dsse_core::{reindex, Complex64, DsseError, DsseResult, MeasurementArray};
use tracing::{debug, info};

use crate::handle::FederateHandle;
use crate::substrate::{is_terminal, Substrate, MAX_TIME};

pub const RECORDER_INPUT: &str = "subscription";

/// Append every fresh update on [`RECORDER_INPUT`] to `output`.
pub fn run_recorder<S: Substrate>(
    mut handle: FederateHandle<S>,
    output: &Path,
) -> DsseResult<usize> {
    let mut writer = BufWriter::new(File::create(output)?);
    let mut recorded = 0;
    handle.enter_execution_mode()?;

    let mut granted = handle.request_time(MAX_TIME)?;
    while !is_terminal(granted) {
        if handle.is_updated(RECORDER_INPUT)? {
            let array: MeasurementArray = handle.read_required(RECORDER_INPUT)?;
            serde_json::to_writer(&mut writer, &array)?;
            writeln!(writer)?;
            recorded += 1;
            debug!(time = granted, values = array.len(), "recorded");
        }
        granted = handle.request_time(MAX_TIME)?;
    }

    writer.flush()?;
    info!(
        federate = handle.name(),
        recorded,
        path = %output.display(),
        "recording finished"
    );
    handle.disconnect()?;
    Ok(recorded)
}

pub fn read_recording(path: &Path) -> DsseResult<Vec<MeasurementArray>> {
    fs::read_to_string(path)?
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| Ok(serde_json::from_str(line)?))
        .collect()
}

/// Compare recorded estimates against recorded truth, tick by tick.
///
/// Ticks are matched by timestamp; truth is reindexed onto the estimate's ids.
/// Estimate ticks without truth are skipped.
pub fn analyze_recordings(
    truth_real: &[MeasurementArray],
    truth_imag: &[MeasurementArray],
    magnitude: &[MeasurementArray],
    angle: &[MeasurementArray],
) -> DsseResult<ErrorTable> {
    let imag_by_time: HashMap<Option<NaiveDateTime>, &MeasurementArray> =
        truth_imag.iter().map(|a| (a.time, a)).collect();
    let truth_by_time: HashMap<Option<NaiveDateTime>, (&MeasurementArray, &MeasurementArray)> =
        truth_real
            .iter()
            .filter_map(|re| imag_by_time.get(&re.time).map(|im| (re.time, (re, *im))))
            .collect();
    let angle_by_time: HashMap<Option<NaiveDateTime>, &MeasurementArray> =
        angle.iter().map(|a| (a.time, a)).collect();

    let mut times = Vec::new();
    let mut truth_rows = Vec::new();
    let mut estimate_rows = Vec::new();
    for mag in magnitude {
        let (Some((re, im)), Some(ang)) = (truth_by_time.get(&mag.time), angle_by_time.get(&mag.time))
        else {
            debug!(time = ?mag.time, "no truth for estimate, skipping");
            continue;
        };
        if ang.ids != mag.ids {
            return Err(DsseError::Validation(
                "estimated magnitude and angle ids differ".into(),
            ));
        }
        let re = reindex(re, &mag.ids)?;
        let im = reindex(im, &mag.ids)?;

        truth_rows.push(
            re.values
                .iter()
                .zip(&im.values)
                .map(|(&r, &i)| Complex64::new(r, i))
                .collect(),
        );
        estimate_rows.push(
            mag.values
                .iter()
                .zip(&ang.values)
                .map(|(&m, &a)| Complex64::from_polar(m, a))
                .collect(),
        );
        times.push(mag.time);
    }

    error_table(&times, &truth_rows, &estimate_rows)
}

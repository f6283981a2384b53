use std::fmt::Write;
use std::path::Path;

use ndarray::Array2;
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_isaac::Isaac64Rng;
use tempdir::TempDir;

use xeli::config::Config;
use xeli::layout::{Layout, LayoutEntry};
use xeli::math::fold_ratio;
use xeli::parser::PlateSize;
use xeli::plate::Plate;
use xeli::regression::{MinimumCorrelation, SelectAll};
use xeli::sample::Stage;
use xeli::{Error, Result};

const TIMEPOINTS: usize = 6;
const CONTROL_OFFSET: (usize, usize) = (0, 0);
const TREATED_OFFSET: (usize, usize) = (0, 4);
const BLANK_GFP: i64 = 200;
const BLANK_OD_MILLI: i64 = 50;
const ELINE_INTERCEPTS: [i64; 3] = [40, 50, 60];

/// A 2x4 layout: a row of blanks, then three e-lines and one reporter gene
fn layout() -> Layout {
    let mut entries = (0..4)
        .map(|col| LayoutEntry {
            row: 0,
            col,
            gene: format!("blank{col}"),
            category: "BLANK".into(),
        })
        .collect::<Vec<_>>();
    for col in 0..3 {
        entries.push(LayoutEntry {
            row: 1,
            col,
            gene: format!("eline{col}"),
            category: "ELINE".into(),
        });
    }
    entries.push(LayoutEntry {
        row: 1,
        col: 3,
        gene: "katG".into(),
        category: "OXIDATIVE".into(),
    });
    Layout::new(entries).unwrap()
}

/// Plate readings in thousandths of OD and in GFP units, indexed (time point, well)
///
/// Cells grow by 0.1 OD per time point with some noise. Over the blanks, e-line wells fluoresce
/// at `1000 * od + intercept` and the reporter well of a sample adds `signal` on top of an
/// intercept of 50.
struct Readings {
    od_milli: Array2<i64>,
    gfp: Array2<i64>,
}

impl Readings {
    fn new<R: Rng>(rng: &mut R) -> Self {
        let wells = PlateSize::Wells96.wells();
        let mut readings = Self {
            od_milli: Array2::from_elem((TIMEPOINTS + 1, wells), 500),
            gfp: Array2::from_elem((TIMEPOINTS + 1, wells), 1000),
        };
        readings.place(CONTROL_OFFSET, 500, rng);
        readings.place(TREATED_OFFSET, 1500, rng);
        readings
    }

    fn place<R: Rng>(&mut self, offset: (usize, usize), signal: i64, rng: &mut R) {
        let well = |row: usize, col: usize| (row + offset.0) * 12 + col + offset.1;
        for t in 0..=TIMEPOINTS {
            for col in 0..4 {
                self.od_milli[[t, well(0, col)]] = BLANK_OD_MILLI;
                self.gfp[[t, well(0, col)]] = BLANK_GFP;
            }
            for col in 0..4 {
                let grown = 100 * (t as i64 + 1) + rng.gen_range(0..10);
                let extra = if col < 3 {
                    ELINE_INTERCEPTS[col]
                } else {
                    50 + signal
                };
                self.od_milli[[t, well(1, col)]] = BLANK_OD_MILLI + grown;
                self.gfp[[t, well(1, col)]] = BLANK_GFP + grown + extra;
            }
        }
    }

    /// Reporter OD of the sample at `offset` once blank corrected, dropping the header time point
    fn corrected_od(&self, offset: (usize, usize)) -> Vec<f64> {
        let well = (1 + offset.0) * 12 + 3 + offset.1;
        (1..=TIMEPOINTS)
            .map(|t| (self.od_milli[[t, well]] - BLANK_OD_MILLI) as f64 / 1000.)
            .collect()
    }

    fn export(&self, overflow: Option<(usize, usize)>) -> String {
        let mut text = String::from("Plate reader export\nMeasurement 1: OD600\n");
        for t in 0..=TIMEPOINTS {
            write!(text, "OD\t{t}:00").unwrap();
            for value in self.od_milli.row(t) {
                write!(text, "\t{:.3}", *value as f64 / 1000.).unwrap();
            }
            text.push('\n');
        }
        text.push_str("Measurement 2: GFP\n");
        for t in 0..=TIMEPOINTS {
            write!(text, "GFP\t{t}:00").unwrap();
            for (well, value) in self.gfp.row(t).iter().enumerate() {
                if overflow == Some((t, well)) {
                    text.push_str("\tOVRFLW");
                } else {
                    write!(text, "\t{value}").unwrap();
                }
            }
            text.push('\n');
        }
        text
    }
}

/// Write a raw export and a layout file into `dir`
fn write_inputs(dir: &Path) -> Result<Readings> {
    let mut rng = Isaac64Rng::seed_from_u64(40);
    let readings = Readings::new(&mut rng);
    // Saturate one e-line reading of the treated sample
    let overflow = (3, 12 + TREATED_OFFSET.1 + 1);
    std::fs::write(dir.join("raw.txt"), readings.export(Some(overflow)))?;
    layout().save(&dir.join("plate.layout"))?;
    Ok(readings)
}

fn plate(dir: &Path, config: Config) -> Result<Plate> {
    let mut plate = Plate::from_files(
        "oxidative",
        PlateSize::Wells96,
        &dir.join("raw.txt"),
        &dir.join("plate.layout"),
        config,
    )?;
    plate.add_ecoli_sample("C1", CONTROL_OFFSET, true)?;
    plate.add_ecoli_sample("C2", TREATED_OFFSET, false)?;
    Ok(plate)
}

#[test]
fn control_stops_at_p() -> Result<()> {
    let tmp_dir = TempDir::new("control_stops_at_p").unwrap();
    let readings = write_inputs(tmp_dir.path())?;
    let mut plate = plate(tmp_dir.path(), Config::default())?;
    plate.analyze(&SelectAll)?;

    let control = plate.control().unwrap();
    assert_eq!(control.stage(), Stage::PComputed);
    assert!(matches!(control.i(), Err(Error::Precondition(_))));
    assert!(matches!(control.xeli(), Err(Error::Precondition(_))));

    let model = control.model()?;
    approx::assert_relative_eq!(model.slope, 1000., max_relative = 1e-6);
    approx::assert_relative_eq!(model.intercept, 50., max_relative = 1e-6);
    approx::assert_relative_eq!(model.intercept_std, (200f64 / 3.).sqrt(), max_relative = 1e-6);

    let p = control.p()?;
    for (t, od) in readings.corrected_od(CONTROL_OFFSET).into_iter().enumerate() {
        approx::assert_relative_eq!(p[[t, 7]], 500. / od, max_relative = 1e-6);
        // Blank OD is zero after the blank correction
        assert!(p[[t, 0]].is_nan());
    }
    Ok(())
}

#[test]
fn treated_sample_is_relative_to_the_control() -> Result<()> {
    let tmp_dir = TempDir::new("treated_sample_is_relative_to_the_control").unwrap();
    let readings = write_inputs(tmp_dir.path())?;
    let mut plate = plate(tmp_dir.path(), Config::default())?;
    plate.analyze(&SelectAll)?;

    let control_p = plate.control().unwrap().p()?;
    let treated = plate.sample_by_name("C2").unwrap();
    assert_eq!(treated.stage(), Stage::XeliComputed);

    // The saturated e-line reading is left out of the fit
    assert!(!treated.mask()?[[2, 5]]);
    approx::assert_relative_eq!(treated.model()?.intercept, 50., max_relative = 1e-6);

    let (p, i) = (treated.p()?, treated.i()?);
    for ((&i, &p), &control) in i.iter().zip(p.iter()).zip(control_p.iter()) {
        if control.is_nan() {
            assert!(i.is_nan());
        } else {
            approx::assert_relative_eq!(i, p / control);
        }
    }

    let control_od = readings.corrected_od(CONTROL_OFFSET);
    let treated_od = readings.corrected_od(TREATED_OFFSET);
    let expected = control_od
        .iter()
        .zip(&treated_od)
        .map(|(control, treated)| fold_ratio((1500. / treated) / (500. / control)))
        .sum::<f64>()
        / TIMEPOINTS as f64;
    approx::assert_relative_eq!(treated.xeli()?[7], expected, max_relative = 1e-6);
    assert!(treated.xeli()?[7] >= 1.);
    Ok(())
}

#[test]
fn tables_are_written_to_the_output_dir() -> Result<()> {
    let tmp_dir = TempDir::new("tables_are_written_to_the_output_dir").unwrap();
    write_inputs(tmp_dir.path())?;
    let config = Config {
        output_dir: Some(tmp_dir.path().to_path_buf()),
        ..Config::default()
    };
    let mut plate = plate(tmp_dir.path(), config)?;
    plate.analyze(&SelectAll)?;

    for file in ["C1.P.tsv", "C2.P.tsv", "C2.I.tsv", "C2.XELI.tsv"] {
        assert!(tmp_dir.path().join(file).exists(), "{file} was not written");
    }
    assert!(!tmp_dir.path().join("C1.I.tsv").exists());
    assert!(!tmp_dir.path().join("C1.XELI.tsv").exists());

    let xeli = std::fs::read_to_string(tmp_dir.path().join("C2.XELI.tsv"))?;
    let lines = xeli.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].ends_with("\tkatG"));
    assert!(lines[1].starts_with("BLANK\t"));
    assert_eq!(lines[2].split('\t').count(), 8);

    let p = std::fs::read_to_string(tmp_dir.path().join("C1.P.tsv"))?;
    assert_eq!(p.lines().count(), 2 + TIMEPOINTS);
    assert!(p.lines().nth(2).unwrap().starts_with("nan\t"));
    Ok(())
}

#[test]
fn definition_file_drives_a_parallel_analysis() -> Result<()> {
    let tmp_dir = TempDir::new("definition_file_drives_a_parallel_analysis").unwrap();
    write_inputs(tmp_dir.path())?;

    let mut sequential = plate(tmp_dir.path(), Config::default())?;
    sequential.analyze(&SelectAll)?;

    let definition = tmp_dir.path().join("assay.toml");
    std::fs::write(
        &definition,
        r#"
name = "oxidative"
plate_type = 96
data_file = "raw.txt"
layout_file = "plate.layout"

[settings]
parallel = true

[[samples]]
name = "C1"
offset = [0, 0]
control = true

[[samples]]
name = "C2"
offset = [0, 4]
"#,
    )?;
    let parallel = xeli::analyze_file(&definition, &SelectAll)?;

    assert!(parallel.config().parallel);
    let expected = sequential.sample_by_name("C2").unwrap().xeli()?;
    let actual = parallel.sample_by_name("C2").unwrap().xeli()?;
    for (actual, expected) in actual.iter().zip(expected.iter()) {
        if expected.is_nan() {
            assert!(actual.is_nan());
        } else {
            approx::assert_relative_eq!(actual, expected);
        }
    }
    Ok(())
}

#[test]
fn strict_selector_accepts_clean_elines() -> Result<()> {
    let tmp_dir = TempDir::new("strict_selector_accepts_clean_elines").unwrap();
    write_inputs(tmp_dir.path())?;
    let mut plate = plate(tmp_dir.path(), Config::default())?;
    plate.analyze(&MinimumCorrelation(0.99))?;
    assert!(plate
        .samples_except_control()
        .all(|sample| sample.xeli().is_ok()));
    Ok(())
}

#[test]
fn plate_without_control_stops_after_p() -> Result<()> {
    let tmp_dir = TempDir::new("plate_without_control_stops_after_p").unwrap();
    write_inputs(tmp_dir.path())?;
    let config = Config {
        output_dir: Some(tmp_dir.path().to_path_buf()),
        ..Config::default()
    };
    let mut plate = Plate::from_files(
        "oxidative",
        PlateSize::Wells96,
        &tmp_dir.path().join("raw.txt"),
        &tmp_dir.path().join("plate.layout"),
        config,
    )?;
    plate.add_ecoli_sample("C2", TREATED_OFFSET, false)?;

    assert!(matches!(plate.analyze(&SelectAll), Err(Error::MissingControl)));
    let sample = plate.sample(0).unwrap();
    assert_eq!(sample.stage(), Stage::PComputed);
    assert!(sample.p().is_ok());
    assert!(tmp_dir.path().join("C2.P.tsv").exists());
    assert!(!tmp_dir.path().join("C2.I.tsv").exists());
    Ok(())
}

#[test]
fn layout_beyond_the_plate_fails_extraction() -> Result<()> {
    let tmp_dir = TempDir::new("layout_beyond_the_plate_fails_extraction").unwrap();
    write_inputs(tmp_dir.path())?;
    let mut plate = plate(tmp_dir.path(), Config::default())?;
    plate.add_ecoli_sample("C3", (7, 9), false)?;

    let result = plate.analyze(&SelectAll);
    assert!(matches!(result, Err(Error::OutOfBounds { sample, .. }) if sample == "C3"));
    Ok(())
}

use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

const SUBJECTS: i64 = 45;
const BIOMARKERS: [(&str, f64, f64); 2] = [
    // (name, peak titre, waning rate per day)
    ("IgG", 800.0, 0.004),
    ("IgA", 250.0, 0.015),
];

/// Antibody kinetics after exposure on day 0: rise to a peak around day 14,
/// then exponential waning.
fn titre(day: f64, peak: f64, waning: f64) -> f64 {
    let rise = 1.0 - (-day / 5.0).exp();
    let decay = (-waning * (day - 14.0).max(0.0)).exp();
    10.0 + peak * rise * decay
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5)).rotate_left(7).wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next_u64() % n
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

#[derive(Default)]
struct Columns {
    pid: Vec<i64>,
    biomarker: Vec<String>,
    day: Vec<i64>,
    value: Vec<f64>,
    sex: Vec<String>,
    age_group: Vec<String>,
}

fn simulate(rng: &mut SimpleRng) -> Columns {
    let sexes = ["F", "M"];
    let age_groups = ["0-17", "18-64", "65+"];
    let mut cols = Columns::default();

    for pid in 1..=SUBJECTS {
        let sex = sexes[rng.below(2) as usize];
        let age_group = age_groups[rng.below(3) as usize];
        // Older subjects respond more weakly.
        let response = match age_group {
            "65+" => 0.6,
            "0-17" => 1.2,
            _ => 1.0,
        };
        let visits = 4 + rng.below(5);
        let mut day = 0;
        for _ in 0..visits {
            for &(name, peak, waning) in &BIOMARKERS {
                let noise = rng.gauss(0.0, 0.15).exp();
                cols.pid.push(pid);
                cols.biomarker.push(name.to_string());
                cols.day.push(day);
                cols.value.push(titre(day as f64, peak * response, waning) * noise);
                cols.sex.push(sex.to_string());
                cols.age_group.push(age_group.to_string());
            }
            day += 7 + rng.below(40) as i64;
        }
    }
    cols
}

fn write_csv(path: &str, cols: &Columns) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).with_context(|| format!("creating {path}"))?;
    writer.write_record(["pid", "biomarker", "day", "value", "sex", "age_group"])?;
    for i in 0..cols.pid.len() {
        writer.write_record([
            cols.pid[i].to_string(),
            cols.biomarker[i].clone(),
            cols.day[i].to_string(),
            format!("{:.3}", cols.value[i]),
            cols.sex[i].clone(),
            cols.age_group[i].clone(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn write_parquet(path: &str, cols: Columns) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("pid", DataType::Int64, false),
        Field::new("biomarker", DataType::Utf8, false),
        Field::new("day", DataType::Int64, false),
        Field::new("value", DataType::Float64, false),
        Field::new("sex", DataType::Utf8, false),
        Field::new("age_group", DataType::Utf8, false),
    ]));

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int64Array::from(cols.pid)),
            Arc::new(StringArray::from(cols.biomarker)),
            Arc::new(Int64Array::from(cols.day)),
            Arc::new(Float64Array::from(cols.value)),
            Arc::new(StringArray::from(cols.sex)),
            Arc::new(StringArray::from(cols.age_group)),
        ],
    )
    .context("building record batch")?;

    let file = std::fs::File::create(path).with_context(|| format!("creating {path}"))?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let mut rng = SimpleRng::new(42);
    let cols = simulate(&mut rng);
    let rows = cols.pid.len();

    write_csv("sample_data.csv", &cols)?;
    write_parquet("sample_data.parquet", cols)?;

    log::info!("simulated {SUBJECTS} subjects");
    println!("Wrote {rows} measurements to sample_data.csv and sample_data.parquet");
    Ok(())
}

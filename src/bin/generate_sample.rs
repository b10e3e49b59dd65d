//! Writes a small synthetic MRST export tree for trying out the CLI.
//!
//! Initial conditions, temporal data and metadata are written as Octave text;
//! static, dynamic field and well data as MAT v5 (field arrays compressed).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use clap::Parser;

use rusty_reservoir::data::mat::{encode_mat, wrap_in_struct, MatWriteOptions};
use rusty_reservoir::data::octave::to_octave_text;
use rusty_reservoir::{NamedArrayTable, NdArray, StructArray, Value};

#[derive(Debug, Parser)]
#[command(about = "Generate a synthetic reservoir export tree")]
struct Args {
    /// Output root; the category subdirectories are created inside it.
    #[arg(long, default_value = "data")]
    out: PathBuf,
    /// Number of report steps.
    #[arg(long, default_value_t = 12)]
    frames: usize,
    #[arg(long, default_value_t = 20)]
    ny: usize,
    #[arg(long, default_value_t = 30)]
    nx: usize,
}

const DT_DAYS: f64 = 30.0;

fn gaussian(dx: f64, dy: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp()
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
}

/// Grid geometry plus well cell positions, shared by every dataset.
struct Grid {
    ny: usize,
    nx: usize,
    wells: Vec<(&'static str, usize, usize)>,
}

impl Grid {
    fn new(ny: usize, nx: usize) -> Self {
        // Injector first, producers along the far edge.
        let wells = vec![
            ("INJ1", 1, 1),
            ("PRD1", ny - 2, nx - 2),
            ("PRD2", ny / 2, nx - 2),
        ];
        Grid { ny, nx, wells }
    }

    fn cells(&self) -> usize {
        self.ny * self.nx
    }

    fn field(&self, f: impl Fn(usize, usize) -> f64) -> Vec<f64> {
        (0..self.ny)
            .flat_map(|i| (0..self.nx).map(move |j| (i, j)))
            .map(|(i, j)| f(i, j))
            .collect()
    }

    fn matrix(&self, data: Vec<f64>) -> Result<NdArray> {
        Ok(NdArray::new(vec![self.ny, self.nx], data)?)
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    ensure!(args.ny >= 4 && args.nx >= 4, "grid must be at least 4x4");
    ensure!(args.frames > 0, "--frames must be positive");

    let grid = Grid::new(args.ny, args.nx);
    let mut rng = SimpleRng::new(42);

    let initial = initial_conditions(&grid)?;
    let statics = static_data(&grid, &mut rng)?;
    let dynamic = field_arrays(&grid, args.frames)?;
    let wells = well_data(&grid, args.frames, &mut rng)?;

    let out = &args.out;
    write_text(&out.join("initial/initial_conditions.txt"), &initial)?;
    write_mat(
        &out.join("static/static_data.mat"),
        &wrap_in_struct("static_data", statics),
        false,
    )?;
    write_mat(
        &out.join("dynamic/fields/field_arrays.mat"),
        &wrap_in_struct("fields", dynamic),
        true,
    )?;
    write_mat(&out.join("dynamic/wells/well_data.mat"), &wells, false)?;
    write_text(&out.join("temporal/time_data.txt"), &temporal(args.frames))?;
    write_text(&out.join("metadata/metadata.txt"), &metadata(&args))?;

    println!(
        "Wrote {} report steps on a {}x{} grid to {}",
        args.frames,
        args.ny,
        args.nx,
        out.display()
    );
    Ok(())
}

fn initial_conditions(grid: &Grid) -> Result<NamedArrayTable> {
    let mut t = NamedArrayTable::new();
    // Legacy names, mapped to pressure/sw on load.
    t.insert("pressure_init", grid.matrix(grid.field(|i, _| 200.0 + 0.5 * i as f64))?);
    t.insert("sw_init", grid.matrix(vec![0.2; grid.cells()])?);
    Ok(t)
}

fn static_data(grid: &Grid, rng: &mut SimpleRng) -> Result<NamedArrayTable> {
    let mut t = NamedArrayTable::new();
    t.insert("grid_x", NdArray::vector((0..grid.nx).map(|j| j as f64 * 10.0).collect()));
    t.insert("grid_y", NdArray::vector((0..grid.ny).map(|i| i as f64 * 10.0).collect()));
    let half = grid.ny / 2;
    t.insert(
        "rock_id",
        grid.matrix(grid.field(|i, _| if i < half { 1.0 } else { 2.0 }))?,
    );
    let porosity: Vec<f64> = (0..grid.cells()).map(|_| 0.15 + 0.1 * rng.next_f64()).collect();
    t.insert("porosity", grid.matrix(porosity)?);

    let elements = grid
        .wells
        .iter()
        .map(|&(name, i, j)| {
            let mut w = NamedArrayTable::new();
            w.insert("name", Value::Text(vec![name.to_string()]));
            w.insert("i", NdArray::scalar(i as f64 + 1.0));
            w.insert("j", NdArray::scalar(j as f64 + 1.0));
            w
        })
        .collect::<Vec<_>>();
    t.insert(
        "wells",
        Value::Struct(StructArray {
            shape: vec![1, elements.len()],
            elements,
        }),
    );
    Ok(t)
}

/// Pressure bump spreading from the injector, water front following it.
fn field_arrays(grid: &Grid, frames: usize) -> Result<NamedArrayTable> {
    let (_, wi, wj) = grid.wells[0];
    let mut pressure = Vec::with_capacity(frames * grid.cells());
    let mut sw = Vec::with_capacity(frames * grid.cells());
    for step in 0..frames {
        let sigma = 1.5 + step as f64 * 0.8;
        pressure.extend(grid.field(|i, j| {
            200.0 + 0.5 * i as f64 + gaussian(i as f64 - wi as f64, j as f64 - wj as f64, sigma, 40.0)
        }));
        sw.extend(grid.field(|i, j| {
            0.2 + gaussian(i as f64 - wi as f64, j as f64 - wj as f64, sigma, 0.6)
        }));
    }
    let shape = vec![frames, grid.ny, grid.nx];
    let mut t = NamedArrayTable::new();
    t.insert("pressure", NdArray::new(shape.clone(), pressure)?);
    t.insert("sw", NdArray::new(shape, sw)?);
    Ok(t)
}

fn well_data(grid: &Grid, frames: usize, rng: &mut SimpleRng) -> Result<NamedArrayTable> {
    let nw = grid.wells.len();
    let mut q_ws = Vec::with_capacity(frames * nw);
    let mut q_os = Vec::with_capacity(frames * nw);
    let mut bhp = Vec::with_capacity(frames * nw);
    for step in 0..frames {
        let decline = (-(step as f64) / frames as f64).exp();
        for k in 0..nw {
            let noise = 1.0 + 0.02 * (rng.next_f64() - 0.5);
            if k == 0 {
                q_ws.push(-500.0 * noise);
                q_os.push(0.0);
                bhp.push(300.0 - step as f64);
            } else {
                let water_cut = step as f64 / (frames as f64 + 2.0);
                q_ws.push(250.0 * water_cut * noise);
                q_os.push(250.0 * (1.0 - water_cut) * decline * noise);
                bhp.push(150.0 + 2.0 * step as f64);
            }
        }
    }
    let shape = vec![frames, nw];
    let mut t = NamedArrayTable::new();
    // Legacy name, mapped to time_days on load.
    t.insert("time", NdArray::vector(report_times(frames)));
    t.insert(
        "well_names",
        Value::Text(grid.wells.iter().map(|(n, _, _)| n.to_string()).collect()),
    );
    t.insert("qWs", NdArray::new(shape.clone(), q_ws)?);
    t.insert("qOs", NdArray::new(shape.clone(), q_os)?);
    t.insert("bhp", NdArray::new(shape, bhp)?);
    Ok(t)
}

fn temporal(frames: usize) -> NamedArrayTable {
    let mut t = NamedArrayTable::new();
    t.insert("time_days", NdArray::vector(report_times(frames)));
    t.insert("dt", NdArray::vector(vec![DT_DAYS; frames]));
    t
}

fn metadata(args: &Args) -> NamedArrayTable {
    let mut t = NamedArrayTable::new();
    t.insert("case_name", Value::Text(vec!["synthetic_waterflood".to_string()]));
    t.insert("nx", NdArray::scalar(args.nx as f64));
    t.insert("ny", NdArray::scalar(args.ny as f64));
    t.insert("n_steps", NdArray::scalar(args.frames as f64));
    t
}

fn report_times(frames: usize) -> Vec<f64> {
    (1..=frames).map(|k| k as f64 * DT_DAYS).collect()
}

fn write_text(path: &Path, table: &NamedArrayTable) -> Result<()> {
    let text = to_octave_text(table)?;
    write_file(path, text.as_bytes())
}

fn write_mat(path: &Path, table: &NamedArrayTable, compress: bool) -> Result<()> {
    let bytes = encode_mat(table, MatWriteOptions { compress })?;
    write_file(path, &bytes)
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))
}

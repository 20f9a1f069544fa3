use clap::{Args, Parser, Subcommand, ValueEnum};
use epochmap::prelude::*;
use epochmap::sim::stage_seed;
use epochmap::{MapSlice, SyntheticMap};
use log::info;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;

const INFO: &str = "\
epochmap: build recombination maps and run staged coalescent simulations
usage: epochmap [--help] <subcommand>

Subcommands:

  slice:     cut a random segment out of a genetic map.
  synth:     synthesize a map from a panel of regions and gaps.
  convert:   convert between map, HapMap and rate CSV formats.
  simulate:  run a single-epoch simulation and export it.
  epochs:    run a chain of epochs and export the final genealogy.

";

#[derive(Parser)]
#[clap(name = "epochmap")]
#[clap(about = INFO)]
struct Cli {
    /// Increase logging verbosity (-d info, -dd debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    debug: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Anchor {
    Uniform,
    Marker,
}

impl From<Anchor> for SliceAnchor {
    fn from(anchor: Anchor) -> Self {
        match anchor {
            Anchor::Uniform => SliceAnchor::Uniform,
            Anchor::Marker => SliceAnchor::Marker,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    /// noisy constant rates sampled every --step bp
    Stepped,
    /// normal-density peaks per region
    Normal,
}

#[derive(Args, Debug)]
struct SliceArgs {
    /// the input map file (chromosome, id, cM, bp)
    #[arg(short, long)]
    map: Option<String>,
    /// chromosome to use, if the map holds several
    #[arg(long)]
    chrom: Option<String>,
    /// segment length in bp
    #[arg(short, long)]
    length: Option<f64>,
    /// pad the slice to this sequence length
    #[arg(long)]
    pad_to: Option<f64>,
    /// rate (Morgans/bp) of the padding interval
    #[arg(long, default_value_t = 2e-8)]
    fill_rate: f64,
    /// how the slice start is drawn
    #[arg(long, value_enum, default_value_t = Anchor::Uniform)]
    anchor: Anchor,
}

#[derive(Args, Debug)]
struct PopArgs {
    /// number of diploid samples
    #[arg(short, long, default_value_t = 500)]
    sample: u32,
    /// diploid effective population size
    #[arg(short, long, default_value_t = 10_000)]
    pop: u32,
    /// mutation rate per bp per generation
    #[arg(short = 'u', long, default_value_t = 1e-8)]
    mutation: f64,
}

#[derive(Subcommand)]
enum Commands {
    /// Cut a random segment out of a genetic map.
    ///
    /// Writes <output>.csv (Position,Rate), <output>_forthread.map (normalized
    /// to start at zero) and <output>.map (the source rows in the segment).
    Slice {
        #[command(flatten)]
        slice: SliceArgs,
        /// output file prefix
        #[arg(short, long, required = true)]
        output: String,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Synthesize a 20 Mb stress map from the built-in region panel.
    ///
    /// Writes <output>.csv and <output>.map.
    Synth {
        #[arg(long, value_enum, default_value_t = Mode::Stepped)]
        mode: Mode,
        /// distance between samples in stepped mode
        #[arg(long, default_value_t = 2000.0)]
        step: f64,
        /// output file prefix
        #[arg(short, long, required = true)]
        output: String,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long, default_value = DEFAULT_CHROM)]
        chrom: String,
    },
    /// Convert a map file to HapMap, or a rate CSV to a map file.
    Convert {
        /// the input map file, written as <output>.hapmap
        #[arg(short, long, required_unless_present = "csv", conflicts_with = "csv")]
        map: Option<String>,
        /// the input Position,Rate CSV, written as <output>.map
        #[arg(long)]
        csv: Option<String>,
        /// sequence end closing the CSV rates
        #[arg(long)]
        end: Option<f64>,
        /// replace every CSV rate with this value
        #[arg(long)]
        constant_rate: Option<f64>,
        #[arg(long, default_value = DEFAULT_CHROM)]
        chrom: String,
        /// output file prefix
        #[arg(short, long, required = true)]
        output: String,
    },
    /// Run one epoch from time zero to full coalescence.
    ///
    /// Uses the whole map, a random --length slice of it, or a --synthetic
    /// panel. Writes the rate map and <output>.trees, <output>.vcf,
    /// <output>_edges.csv and <output>.checkpoint.json.
    Simulate {
        #[command(flatten)]
        pop: PopArgs,
        #[command(flatten)]
        slice: SliceArgs,
        /// use a synthetic panel instead of --map
        #[arg(long, value_enum, conflicts_with = "map")]
        synthetic: Option<Mode>,
        /// output file prefix
        #[arg(short, long, required = true)]
        output: String,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Run a chain of epochs separated at --boundaries, each with a freshly
    /// sliced map, and export the final genealogy.
    Epochs {
        #[command(flatten)]
        pop: PopArgs,
        #[command(flatten)]
        slice: SliceArgs,
        /// generations at which one epoch ends and the next begins
        #[arg(long, value_delimiter = ',', default_values_t = [5000.0, 10000.0])]
        boundaries: Vec<f64>,
        /// output file prefix
        #[arg(short, long, required = true)]
        output: String,
        #[arg(long, default_value_t = 123)]
        seed: u64,
    },
}

fn init_logger(debug: u8) {
    env_logger::Builder::new()
        .filter_level(match debug {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .init();
}

fn read_map(args: &SliceArgs) -> Result<GeneticMap, Error> {
    let path = args.map.as_deref().ok_or_else(|| {
        MapError::InvalidParameter("an input map is required (--map)".to_string())
    })?;
    let maps = GeneticMaps::from_path(path)?;
    Ok(maps.select(args.chrom.as_deref())?.clone())
}

fn slice_params(args: &SliceArgs, length: f64) -> SliceParams {
    SliceParams {
        length,
        anchor: args.anchor.into(),
        pad_to: args.pad_to,
        fill_rate: args.fill_rate,
    }
}

fn slice_map(args: &SliceArgs, output: &str, seed: u64) -> Result<MapSlice, Error> {
    let genetic_map = read_map(args)?;
    let params = slice_params(args, args.length.unwrap_or(10_000_000.0));
    let mut rng = Xoshiro256StarStar::seed_from_u64(seed);
    let slice = RateMapBuilder::slice(&genetic_map, &params, &mut rng)?;
    slice.write(output)?;
    Ok(slice)
}

fn synthesize(mode: Mode, step: f64, seed: u64) -> Result<SyntheticMap, Error> {
    let params = SyntheticParams {
        step,
        ..Default::default()
    };
    let synth = match mode {
        Mode::Stepped => {
            let (regions, gaps) = presets::stepped_panel();
            let mut rng = Xoshiro256StarStar::seed_from_u64(seed);
            RateMapBuilder::stepped(&regions, &gaps, &params, &mut rng)?
        }
        Mode::Normal => {
            let (regions, gaps) = presets::normal_panel();
            RateMapBuilder::normal_peaks(&regions, &gaps, &params)?
        }
    };
    Ok(synth)
}

fn convert(
    map: Option<&str>,
    csv: Option<&str>,
    end: Option<f64>,
    constant_rate: Option<f64>,
    chrom: &str,
    output: &str,
) -> Result<(), Error> {
    match (map, csv) {
        (Some(map), _) => {
            let maps = GeneticMaps::from_path(map)?;
            if maps.len() == 1 {
                maps.select(None)?.write_hapmap(&format!("{}.hapmap", output))?;
            } else {
                for (name, genetic_map) in maps.iter() {
                    genetic_map.write_hapmap(&format!("{}_{}.hapmap", output, name))?;
                }
            }
        }
        (None, Some(csv)) => {
            let mut rate_map = RateMap::read_csv(csv, end)?;
            if let Some(rate) = constant_rate {
                rate_map = rate_map.with_constant_rate(rate)?;
            }
            rate_map.write_map(&format!("{}.map", output), chrom)?;
        }
        (None, None) => {
            return Err(
                MapError::InvalidParameter("one of --map or --csv is required".to_string()).into(),
            )
        }
    }
    Ok(())
}

fn simulate(
    pop: &PopArgs,
    slice: &SliceArgs,
    synthetic: Option<Mode>,
    output: &str,
    seed: u64,
) -> Result<(), Error> {
    let (rate_map, chrom) = match synthetic {
        Some(mode) => {
            let synth = synthesize(mode, 2000.0, seed)?;
            let chrom = slice.chrom.clone().unwrap_or_else(|| DEFAULT_CHROM.to_string());
            (synth.write(output, &chrom)?, chrom)
        }
        None => {
            if slice.length.is_some() {
                let sliced = slice_map(slice, output, seed)?;
                (sliced.rate_map, sliced.source.chrom)
            } else {
                let genetic_map = read_map(slice)?;
                let rate_map = RateMapBuilder::from_genetic_map(&genetic_map)?;
                rate_map.write_csv(&format!("{}.csv", output))?;
                rate_map.write_map(&format!("{}_forthread.map", output), &genetic_map.chrom)?;
                (rate_map, genetic_map.chrom)
            }
        }
    };

    let stage = SimulationStage {
        population_size: pop.pop,
        sample_size: pop.sample,
        rate_map,
        mutation_rate: pop.mutation,
        start_time: None,
        end_time: None,
        seed: Some(seed),
    };
    let genealogy = epochmap::run_stage(&CoalescentSimulator::default(), &stage, None, seed)?;
    genealogy.export(output, &chrom)?;
    Ok(())
}

fn run_epochs(
    pop: &PopArgs,
    slice: &SliceArgs,
    boundaries: &[f64],
    output: &str,
    seed: u64,
) -> Result<(), Error> {
    let genetic_map = read_map(slice)?;
    let length = slice.length.unwrap_or(20_000_000.0);
    // every epoch must share one sequence length to continue the genealogy
    let mut params = slice_params(slice, length);
    params.pad_to = Some(slice.pad_to.unwrap_or(length));

    let mut starts = vec![0.0];
    starts.extend(boundaries.iter().copied());
    let mut ends: Vec<Option<f64>> = boundaries.iter().map(|&b| Some(b)).collect();
    ends.push(None);

    let mut chain = EpochChain::new(CoalescentSimulator::default(), seed);
    for (i, (start, end)) in starts.into_iter().zip(ends).enumerate() {
        let stage_seed = stage_seed(seed, i);
        let mut rng = Xoshiro256StarStar::seed_from_u64(stage_seed);
        let sliced = RateMapBuilder::slice(&genetic_map, &params, &mut rng)?;
        sliced.write(&format!("{}_stage{}", output, i + 1))?;
        info!("epoch {} uses {}:{}-{}", i + 1, genetic_map.chrom, sliced.start, sliced.end);
        chain.push(SimulationStage {
            population_size: pop.pop,
            sample_size: pop.sample,
            rate_map: sliced.rate_map,
            mutation_rate: pop.mutation,
            start_time: Some(start),
            end_time: end,
            seed: Some(stage_seed),
        });
    }
    let genealogy = chain.run()?;
    info!(
        "final genealogy covers {} generations",
        genealogy.total_elapsed()
    );
    genealogy.export(output, &genetic_map.chrom)?;
    Ok(())
}

fn run() -> Result<(), Error> {
    let cli = Cli::parse();
    init_logger(cli.debug);
    match &cli.command {
        Some(Commands::Slice {
            slice,
            output,
            seed,
        }) => {
            slice_map(slice, output, *seed)?;
            Ok(())
        }
        Some(Commands::Synth {
            mode,
            step,
            output,
            seed,
            chrom,
        }) => {
            synthesize(*mode, *step, *seed)?.write(output, chrom)?;
            Ok(())
        }
        Some(Commands::Convert {
            map,
            csv,
            end,
            constant_rate,
            chrom,
            output,
        }) => convert(
            map.as_deref(),
            csv.as_deref(),
            *end,
            *constant_rate,
            chrom,
            output,
        ),
        Some(Commands::Simulate {
            pop,
            slice,
            synthetic,
            output,
            seed,
        }) => simulate(pop, slice, *synthetic, output, *seed),
        Some(Commands::Epochs {
            pop,
            slice,
            boundaries,
            output,
            seed,
        }) => run_epochs(pop, slice, boundaries, output, *seed),
        None => {
            println!("{}\n", INFO);
            std::process::exit(1);
        }
    }
}

fn main() {
    match run() {
        Ok(_) => {}
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

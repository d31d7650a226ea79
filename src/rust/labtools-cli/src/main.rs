// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! `labtools`: sequence generation, curve fits and simulated measurements
//! from the command line.

mod commands;
mod config;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use labone_log::{info, warn};
use qubit_fit::ModelKind;

use crate::config::LabConfig;

#[derive(Parser, Debug)]
#[command(name = "labtools", version)]
#[command(about = "LabOne lab-automation tools")]
struct Cli {
    /// Log per-point progress of measurement loops
    #[arg(long, global = true)]
    diagnostics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate sequence programs
    #[command(subcommand)]
    Seqc(SeqcCommand),
    /// Fit a tune-up model to `x,y` data
    Fit {
        /// One of osc, decay-osc, exp, lorentz, inv-lorentz, fano
        model: ModelKind,
        /// CSV file with `x` and `y` columns
        csv: PathBuf,
        /// Initial guess, trailing optional parameters included
        #[arg(long, value_delimiter = ',', allow_negative_numbers = true, required = true)]
        p0: Vec<f64>,
    },
    /// Run measurements against the simulated instrument
    #[command(subcommand)]
    Simulate(SimulateCommand),
}

#[derive(Subcommand, Debug)]
enum SeqcCommand {
    /// Multiplexed readout program for the UHFQA
    Readout {
        #[arg(long, value_delimiter = ',', required = true)]
        channels: Vec<usize>,
        /// Readout frequency of every channel in Hz
        #[arg(long, value_delimiter = ',', required = true)]
        frequencies: Vec<f64>,
        #[arg(long, default_value = "1")]
        averages: u32,
        /// Qubit state (0 or 1) per readout channel
        #[arg(long, value_delimiter = ',')]
        states: Option<Vec<u8>>,
    },
}

#[derive(Subcommand, Debug)]
enum SimulateCommand {
    /// Bias and frequency impedance map, written as amp.csv, the.csv, c.csv
    ImpedanceMap {
        #[arg(long)]
        config: Option<PathBuf>,
        /// Overrides `output_dir` of the configuration
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<LabConfig> {
    let mut config = match path {
        Some(path) => LabConfig::load(path)?,
        None => LabConfig::default(),
    };
    for msg in config.sanitize() {
        warn!(
            "Configuration value `{}` is sanitized from {} to {}. Reason: {}",
            msg.field,
            msg.original,
            msg.sanitized,
            msg.reason
        );
    }
    Ok(config)
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Seqc(SeqcCommand::Readout {
            channels,
            frequencies,
            averages,
            states,
        }) => {
            let program =
                commands::readout_program(&channels, &frequencies, averages, states.as_deref())?;
            println!("{program}");
        }
        Command::Fit { model, csv, p0 } => {
            let result = commands::fit_csv(model, &csv, &p0)?;
            print!("{}", commands::format_fit(model, &result));
        }
        Command::Simulate(SimulateCommand::ImpedanceMap { config, output }) => {
            let mut config = load_config(config.as_ref())?;
            if let Some(output) = output {
                config.output_dir = output;
            }
            let (map, files) = commands::simulate_impedance_map(&config)?;
            info!(
                "Simulated {} x {} impedance map",
                map.biases.len(),
                map.frequencies.len()
            );
            for file in files {
                println!("{}", file.display());
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();
    labone_log::init_logging(cli.diagnostics);
    run(cli)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_readout() {
        let cli = Cli::try_parse_from([
            "labtools",
            "seqc",
            "readout",
            "--channels",
            "0,2",
            "--frequencies",
            "10e6,20e6,30e6",
            "--averages",
            "8",
            "--states",
            "1,0",
        ])
        .unwrap();
        let Command::Seqc(SeqcCommand::Readout {
            channels,
            frequencies,
            averages,
            states,
        }) = cli.command
        else {
            panic!("expected the readout command");
        };
        assert_eq!(channels, [0, 2]);
        assert_eq!(frequencies, [10e6, 20e6, 30e6]);
        assert_eq!(averages, 8);
        assert_eq!(states, Some(vec![1, 0]));
    }

    #[test]
    fn test_parse_fit() {
        let cli =
            Cli::try_parse_from(["labtools", "fit", "fano", "res.csv", "--p0", "1e6,7.1e9,-0.2"])
                .unwrap();
        let Command::Fit { model, csv, p0 } = cli.command else {
            panic!("expected the fit command");
        };
        assert_eq!(model, ModelKind::Fano);
        assert_eq!(csv, PathBuf::from("res.csv"));
        assert_eq!(p0, [1e6, 7.1e9, -0.2]);
        assert!(Cli::try_parse_from(["labtools", "fit", "gauss", "res.csv", "--p0", "1"]).is_err());
    }
}

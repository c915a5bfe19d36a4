// Copyright 2024 by Michael Thies <mail@mhthies.de>
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use this file except in compliance with
// the License. You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

use std::fs::File;
use std::sync::Arc;
use std::time;

use log::{debug, error, info, warn};

use etto::ettmcts::{self, SolverConfig};
use etto::io;

fn main() {
    // Setup logging & parse command line arguments
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!(
        "This is the examination timetabling optimizer (etto), version {}",
        option_env!("CARGO_PKG_VERSION").unwrap_or("unknown")
    );
    let args = parse_cli_args();

    if args.get_one::<String>("OUTPUT").is_none()
        && !args.get_flag("print")
        && args.get_one::<String>("json").is_none()
    {
        warn!(
            "No OUTPUT file and no --print or --json option given. The timetable will not \
             be exported anywhere."
        );
    }

    // Open and parse the instance file
    let inpath: &String = args.get_one("INPUT").unwrap();
    debug!("Opening input file {} ...", inpath);
    let file = File::open(inpath).unwrap_or_else(|e| {
        error!("Could not open input file {}: {}", inpath, e);
        std::process::exit(exitcode::NOINPUT)
    });
    let instance = io::exam_format::read(file).unwrap_or_else(|e| {
        error!("Could not read instance file {}: {}", inpath, e);
        std::process::exit(exitcode::DATAERR)
    });

    info!(
        "Found {} exams, {} periods and {} rooms for timetabling.",
        instance.exams.len(),
        instance.periods.len(),
        instance.rooms.len()
    );
    if instance.exams.is_empty() {
        error!("Calculating a timetable is only possible with 1 or more exams.");
        std::process::exit(exitcode::DATAERR);
    }

    let time_limit = *args.get_one::<u64>("time_limit").unwrap();
    let config = SolverConfig {
        time_limit: if time_limit == 0 {
            None
        } else {
            Some(time::Duration::from_secs(time_limit))
        },
        iter_limit: args.get_one::<u64>("iter_limit").copied(),
        seed: *args.get_one::<u64>("seed").unwrap(),
        pruning: !args.get_flag("no_pruning"),
        stop_on_feasible: args.get_flag("stop_on_feasible"),
        expansion_limit: *args.get_one::<usize>("expansion_limit").unwrap(),
        ..SolverConfig::default()
    };

    // Execute the tree search
    let instance = Arc::new(instance);
    let (result, statistics) = ettmcts::solve(instance.clone(), &config);
    info!("Finished solving timetable. {}", statistics);

    let result = match result {
        Some(result) => result,
        None => {
            // The search always performs at least the root rollout, so this only happens
            // on an instance without exams, which has been rejected above.
            error!("The search did not produce any solution.");
            std::process::exit(exitcode::SOFTWARE);
        }
    };

    if result.score.hard() == 0 {
        info!(
            "Found a feasible timetable with soft penalty {}.",
            result.score.soft()
        );
    } else {
        warn!(
            "No feasible timetable found within the budget. Best solution has {} hard \
             constraint violations.",
            result.score.hard()
        );
    }

    if let Some(outpath) = args.get_one::<String>("OUTPUT") {
        debug!("Opening output file {} ...", outpath);
        match File::create(outpath) {
            Err(e) => {
                error!("Could not open output file {}: {}.", outpath, e);
                std::process::exit(exitcode::IOERR);
            }
            Ok(file) => match io::write_solution(file, &result.bookings, &result.score) {
                Ok(_) => debug!("Timetable written to {}.", outpath),
                Err(e) => {
                    error!("Could not write timetable to {}: {}.", outpath, e);
                    std::process::exit(exitcode::IOERR);
                }
            },
        }
    }

    if let Some(jsonpath) = args.get_one::<String>("json") {
        match File::create(jsonpath) {
            Err(e) => {
                error!("Could not open report file {}: {}.", jsonpath, e);
                std::process::exit(exitcode::IOERR);
            }
            Ok(file) => match io::write_report_json(file, &result.bookings, &result.score) {
                Ok(_) => debug!("JSON report written to {}.", jsonpath),
                Err(e) => {
                    error!("Could not write JSON report to {}: {}.", jsonpath, e);
                    std::process::exit(exitcode::IOERR);
                }
            },
        }
    }

    if args.get_flag("print") {
        print!(
            "The timetable is:\n{}",
            io::format_timetable(&instance, &result.bookings)
        );
    }
}

/// Helper function to construct and execute parser for command line options
fn parse_cli_args() -> clap::ArgMatches {
    clap::command!()
        .arg(
            clap::Arg::new("time_limit")
                .short('t')
                .long("time-limit")
                .help(
                    "Wall clock budget for the search in seconds. Pass 0 to search \
                     without a time limit (until the tree is exhausted or the iteration \
                     limit strikes).",
                )
                .value_name("SECONDS")
                .value_parser(clap::value_parser!(u64))
                .default_value("60"),
        )
        .arg(
            clap::Arg::new("iter_limit")
                .long("iter-limit")
                .help("Maximum number of search iterations.")
                .value_name("ITERATIONS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            clap::Arg::new("seed")
                .short('s')
                .long("seed")
                .help(
                    "Seed of the search RNG. Two runs with the same seed, instance and \
                     budget produce the same sequence of incumbents.",
                )
                .value_name("SEED")
                .value_parser(clap::value_parser!(u64))
                .default_value("42"),
        )
        .arg(
            clap::Arg::new("stop_on_feasible")
                .long("stop-on-feasible")
                .help(
                    "Return as soon as a feasible timetable is found, instead of \
                     spending the remaining budget on lowering its soft penalty.",
                )
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            clap::Arg::new("no_pruning")
                .long("no-pruning")
                .help(
                    "Disable branch-and-bound pruning of subtrees that cannot beat the \
                     incumbent.",
                )
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            clap::Arg::new("expansion_limit")
                .long("expansion-limit")
                .help("Number of child nodes created per search iteration.")
                .value_name("CHILDREN")
                .value_parser(clap::value_parser!(usize))
                .default_value("1"),
        )
        .arg(
            clap::Arg::new("json")
                .long("json")
                .help("Write the timetable and its score breakdown as JSON to this file.")
                .value_name("FILE"),
        )
        .arg(
            clap::Arg::new("print")
                .short('p')
                .long("print")
                .help("Print the calculated timetable to stdout in a human readable format")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            clap::Arg::new("INPUT")
                .help("Sets the instance file (.exam format) to use")
                .required(true)
                .index(1),
        )
        .arg(
            clap::Arg::new("OUTPUT")
                .help("Sets the solution output file to use")
                .index(2),
        )
        .get_matches()
}

use std::io::{self, Read};
use std::process::ExitCode;

use burrow_solver::{parse_board, solve};

// Input format:
// a # is a wall, a . is an open cell, A-D are pods of the four types,
// spaces are padding outside the board. The whole diagram is read from
// stdin; the minimum sorting energy is printed as the only stdout line.
fn main() -> ExitCode {
    let mut input = String::new();
    if let Err(err) = io::stdin().read_to_string(&mut input) {
        eprintln!("error reading input: {err}");
        return ExitCode::from(2);
    }

    let (board, start) = match parse_board(&input) {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("invalid board: {err}");
            return ExitCode::from(2);
        }
    };

    let (visited, generated, result) = solve(&board, &start);
    eprintln!("visited {visited} states (generated {generated} total)");

    match result {
        Some(cost) => {
            println!("{cost}");
            ExitCode::SUCCESS
        }
        None => {
            eprintln!("no solution");
            ExitCode::FAILURE
        }
    }
}

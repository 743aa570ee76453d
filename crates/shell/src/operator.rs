//! Terminal operator

use provisioning::Operator;
use std::io::{self, BufRead, Write};

/// Operator at the terminal: messages go to stdout, answers come from stdin
#[derive(Debug, Default)]
pub struct StdinOperator;

impl Operator for StdinOperator {
    fn notify(&mut self, message: &str) {
        println!("{}", message);
    }

    fn prompt(&mut self, message: &str) -> Option<String> {
        println!("{}", message);
        let _ = io::stdout().flush();

        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches(&['\r', '\n'][..]).to_string()),
        }
    }
}

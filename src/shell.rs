//! Interactive shell command.
//!
//! A small prompt with prefix-matched commands. Beyond `help`, the commands
//! are placeholders kept for the intended interactive workflow.

use std::io::{BufRead, Write};

#[derive(Debug, PartialEq)]
struct Cmd {
    name: &'static str,
    help: &'static str,
    run: fn(&str) -> Result<(), String>,
}

fn nyi(_line: &str) -> Result<(), String> {
    Err("command not yet implemented".to_string())
}

fn help(_line: &str) -> Result<(), String> {
    const WIDTH: usize = 7;
    println!("  {:>WIDTH$}  {}", "Command", "Description");
    for cmd in COMMANDS {
        println!("  {:<WIDTH$}  {}", cmd.name, cmd.help);
    }
    println!();
    Ok(())
}

const COMMANDS: &[Cmd] = &[
    Cmd { name: "cd", help: "change current working directory", run: nyi },
    Cmd { name: "getattr", help: "run NFS getattr", run: nyi },
    Cmd { name: "help", help: "print this help list", run: help },
    Cmd { name: "ls", help: "list files", run: nyi },
    Cmd { name: "mkdir", help: "make directories", run: nyi },
    Cmd { name: "mount", help: "mount an nfs file system", run: nyi },
    Cmd { name: "rm", help: "remove directory entries", run: nyi },
    Cmd { name: "rmdir", help: "remove directory", run: nyi },
    Cmd { name: "umount", help: "unmount an nfs file system", run: nyi },
];

/// Matches `word` against the command table: unique prefixes resolve, exact
/// names win over longer commands sharing the prefix.
fn lookup(word: &str) -> Result<&'static Cmd, &'static str> {
    let word = word.to_ascii_lowercase();
    let mut found: Option<&Cmd> = None;

    for cmd in COMMANDS {
        if !cmd.name.starts_with(&word) {
            continue;
        }
        if cmd.name.len() == word.len() {
            return Ok(cmd);
        }
        if found.is_some() {
            return Err("ambiguous");
        }
        found = Some(cmd);
    }

    found.ok_or("invalid")
}

/// Runs the shell until EOF. Returns the process exit code.
pub fn run() -> i32 {
    let stdin = std::io::stdin();
    let mut line = String::new();

    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        line.clear();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        let trimmed = line.trim_start();
        let Some(word) = trimmed.split_whitespace().next() else {
            continue;
        };

        match lookup(word) {
            Ok(cmd) => {
                if let Err(msg) = (cmd.run)(trimmed) {
                    println!("{msg}");
                }
            }
            Err(why) => {
                println!("{why} command '{word}', type 'help' for help\n");
            }
        }
    }

    0
}

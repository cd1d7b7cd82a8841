//! Line-oriented input for the server and client REPLs.

use std::io::{self, BufRead, Write};

/// Read one line and split it into words. `None` at end of input.
pub fn read_words<R: BufRead>(reader: &mut R) -> io::Result<Option<Vec<String>>> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.split_whitespace().map(str::to_string).collect()))
}

/// Prompt on stdout and read the words of one line from stdin.
pub fn get_input() -> io::Result<Option<Vec<String>>> {
    let mut stdout = io::stdout();
    write!(stdout, "> ")?;
    stdout.flush()?;
    read_words(&mut io::stdin().lock())
}

/// Ask for a username until a non-empty one is given.
pub fn client_welcome() -> io::Result<Option<String>> {
    println!("Welcome to the Peril client!");
    println!("Please enter your username:");
    loop {
        match get_input()? {
            None => return Ok(None),
            Some(words) => match words.into_iter().next() {
                Some(name) => {
                    println!("Welcome, {}!", name);
                    return Ok(Some(name));
                }
                None => println!("You must enter a username. Try again."),
            },
        }
    }
}

pub fn print_server_help() {
    println!("Possible commands:");
    println!("* pause");
    println!("* resume");
    println!("* quit");
    println!("* help");
}

pub fn print_client_help() {
    println!("Possible commands:");
    println!("* move <location> <unitID> <unitID> <unitID>...");
    println!("    example:");
    println!("    move asia 1");
    println!("* spawn <location> <rank>");
    println!("    example:");
    println!("    spawn europe infantry");
    println!("* status");
    println!("* spam <n>");
    println!("    example:");
    println!("    spam 5");
    println!("* quit");
    println!("* help");
}

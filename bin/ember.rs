use anyhow::Error as Failure;
use clap::Parser;
use ember::uci::{Outbound, Uci, UciParser};
use futures::channel::mpsc::unbounded;
use futures::executor::block_on;
use futures::sink::unfold as sink;
use std::future::ready;
use std::io::{prelude::*, stdin, stdout};
use std::thread;

#[derive(Debug, Parser)]
#[clap(name = "Ember", version)]
#[clap(help_template = "
{name} v{version}

{name} is a UCI chess engine.
It is released as free software under the terms of the GNU GPLv3 license.
")]
struct Cli {}

fn main() -> Result<(), Failure> {
    let _args = Cli::parse();

    let (tx, input) = unbounded();

    thread::spawn(move || {
        let mut parser = UciParser::default();
        let mut lines = stdin().lock().lines();
        while let Some(Ok(line)) = lines.next() {
            match line.trim() {
                "" => continue,
                trimmed => match parser.parse(trimmed) {
                    Err(e) => eprintln!("info string ignored command, {e}"),
                    Ok(cmd) => match tx.unbounded_send(cmd) {
                        Ok(()) => continue,
                        Err(_) => break,
                    },
                },
            }
        }
    });

    let handle = thread::spawn(move || {
        let mut stdout = stdout().lock();
        let output = sink((), move |(), o: Outbound| {
            ready(writeln!(stdout, "{o}").and_then(|()| stdout.flush()))
        });

        let mut output = Box::pin(output);
        block_on(Uci::new(input, &mut output).run())?;
        Ok::<_, Failure>(())
    });

    handle.join().expect("the UCI thread panicked")
}

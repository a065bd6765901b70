//! Interactive shell implementation.
//!
//! Reads one operation per line (`CONN`, `UPLD`, `LIST`, `DWLD`, `DELF`,
//! `QUIT`), asks for whatever the operation needs and prints the outcome.
//! Ctrl+C and end of input take the same way out as `QUIT`.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use ferry_core::client::{
    ConfirmReply, DeleteResult, DownloadResult, Session, SessionState, UploadResult,
};
use ferry_core::connection::resolve_host_address;
use ferry_core::protocol::{self, OpCode};

use super::ShellArgs;
use crate::ui;

/// Line-oriented input from stdin.
struct Prompt {
    lines: Lines<BufReader<Stdin>>,
}

impl Prompt {
    fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    /// Print `prompt` and read one line. `None` means end of input.
    async fn ask(&mut self, prompt: &str) -> Result<Option<String>> {
        print!("{prompt}");
        io::stdout().flush()?;
        Ok(self.lines.next_line().await?)
    }
}

/// One line of operator input.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Empty,
    Help,
    Operation(OpCode, Option<String>),
    Invalid(String),
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }

    let (word, rest) = line
        .split_once(char::is_whitespace)
        .map_or((line, None), |(word, rest)| (word, Some(rest.trim())));
    let argument = rest.filter(|r| !r.is_empty()).map(str::to_string);

    if word.eq_ignore_ascii_case("help") || word == "?" {
        return Input::Help;
    }
    match OpCode::parse(&word.to_ascii_uppercase()) {
        Some(op) => Input::Operation(op, argument),
        None => Input::Invalid(word.to_string()),
    }
}

/// How the shell loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Quit,
    EndOfInput,
    Interrupted,
}

struct Shell {
    session: Session,
    prompt: Prompt,
    server: String,
    download_dir: PathBuf,
    /// An exchange with the server is in progress
    busy: bool,
}

/// Run the shell command.
pub async fn run(args: ShellArgs) -> Result<()> {
    let config = super::load_config();
    config.validate()?;

    let mut shell = Shell {
        session: Session::new(config.transfer.chunk_size),
        prompt: Prompt::new(),
        server: args.server.unwrap_or(config.client.server),
        download_dir: args.download_dir.unwrap_or(config.client.download_dir),
        busy: false,
    };

    println!();
    println!("Ferry v{}", ferry_core::VERSION);
    println!("{}", "-".repeat(37));
    println!();
    println!("  Server:    {}", shell.server);
    println!("  Downloads: {}", shell.download_dir.display());
    println!();
    println!("  Type CONN to connect, HELP for the list of operations.");
    println!();

    let exit = tokio::select! {
        exit = shell.repl() => exit?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            println!();
            Exit::Interrupted
        }
    };

    shell.shutdown(exit).await;
    Ok(())
}

impl Shell {
    async fn repl(&mut self) -> Result<Exit> {
        loop {
            let Some(line) = self.prompt.ask("ferry> ").await? else {
                println!();
                return Ok(Exit::EndOfInput);
            };

            match parse_input(&line) {
                Input::Empty => {}
                Input::Help => print_help(),
                Input::Invalid(word) => println!("  '{}' is not a valid operation", word),
                Input::Operation(OpCode::Quit, _) => return Ok(Exit::Quit),
                Input::Operation(op, argument) => {
                    let was_connected = self.session.state() == SessionState::Connected;
                    if let Err(e) = self.execute(op, argument).await {
                        println!("  Error: {e:#}");
                        if was_connected && self.session.state() == SessionState::Disconnected {
                            println!("  Connection lost, use CONN to reconnect.");
                        }
                    }
                    self.busy = false;
                }
            }
        }
    }

    /// Take the operation's argument, or ask for it.
    async fn argument(&mut self, given: Option<String>, question: &str) -> Result<Option<String>> {
        if given.is_some() {
            return Ok(given);
        }
        let answer = self.prompt.ask(question).await?;
        Ok(answer.map(|a| a.trim().to_string()).filter(|a| !a.is_empty()))
    }

    async fn execute(&mut self, op: OpCode, argument: Option<String>) -> Result<()> {
        match op {
            OpCode::Conn => self.connect().await,
            OpCode::Upload => {
                let Some(path) = self.argument(argument, "  File to upload: ").await? else {
                    return Ok(());
                };
                self.upload(Path::new(&path)).await
            }
            OpCode::List => {
                self.busy = true;
                let names = self.session.list().await?;
                ui::print_listing(&names);
                Ok(())
            }
            OpCode::Download => {
                let Some(name) = self.argument(argument, "  File to download: ").await? else {
                    return Ok(());
                };
                self.download(&name).await
            }
            OpCode::Delete => {
                let Some(name) = self.argument(argument, "  File to delete: ").await? else {
                    return Ok(());
                };
                self.delete(&name).await
            }
            OpCode::Quit => Ok(()),
        }
    }

    async fn connect(&mut self) -> Result<()> {
        let addr = resolve_host_address(&self.server).await?;
        self.session.connect(addr).await?;
        println!("  Connection established with {}", addr);
        Ok(())
    }

    async fn upload(&mut self, path: &Path) -> Result<()> {
        let label = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());

        self.busy = true;
        let result = self
            .session
            .upload(path, |progress| ui::show_progress(&label, progress))
            .await?;

        match result {
            UploadResult::LocalFileMissing => {
                println!("  {} does not exist.", path.display());
            }
            UploadResult::NotReady(reply) => {
                println!("  Server is not ready to receive data ({}).", reply);
            }
            UploadResult::Completed {
                receipt,
                total_size,
                local_elapsed,
            } => {
                println!(
                    "  Uploaded {}: server received {} of {} bytes in {} ({} here)",
                    label,
                    receipt.bytes_received,
                    total_size,
                    ui::format_secs(receipt.elapsed),
                    ui::format_secs(local_elapsed)
                );
            }
        }
        Ok(())
    }

    async fn download(&mut self, name: &str) -> Result<()> {
        self.busy = true;
        let result = self
            .session
            .download(name, &self.download_dir, |progress| {
                ui::show_progress(name, progress);
            })
            .await?;

        match result {
            DownloadResult::NotFound => println!("  {} does not exist on the server.", name),
            DownloadResult::Completed {
                bytes,
                elapsed,
                total,
            } => {
                println!(
                    "  Downloaded {}: {} of {} bytes ({}) in {}",
                    name,
                    bytes,
                    total,
                    ui::format_size(total),
                    ui::format_secs(elapsed)
                );
            }
        }
        Ok(())
    }

    async fn delete(&mut self, name: &str) -> Result<()> {
        self.busy = true;
        let prompt = &mut self.prompt;
        let result = self
            .session
            .delete(name, move |name: &str| {
                let question = format!("  Are you sure you want to delete {name}? (Yes/No): ");
                async move {
                    match prompt.ask(&question).await {
                        Ok(Some(answer)) => ConfirmReply::from_input(&answer),
                        _ => ConfirmReply::no(),
                    }
                }
            })
            .await?;

        match result {
            DeleteResult::NotFound => println!("  {} does not exist on the server.", name),
            DeleteResult::Completed { text, .. } => println!("  {}", text.trim()),
            DeleteResult::ServerError(code) => {
                println!("  Server reported an error (code {}).", code);
            }
        }
        Ok(())
    }

    /// The single way out of the shell.
    async fn shutdown(&mut self, exit: Exit) {
        if self.busy {
            println!("  Interrupted during an operation, closing the connection.");
            self.session.close();
            return;
        }

        let connected = self.session.state() == SessionState::Connected;
        if let Err(e) = self.session.quit().await {
            tracing::warn!("Failed to send QUIT: {}", e);
        }
        if connected || exit == Exit::Quit {
            println!("  Connection closed.");
        }
    }
}

fn print_help() {
    println!("  CONN         connect to the server");
    println!("  UPLD [path]  upload a local file");
    println!("  LIST         list the files on the server");
    println!("  DWLD [name]  download a file");
    println!("  DELF [name]  delete a file on the server");
    println!("  QUIT         close the connection and exit");
    println!(
        "  Messages are at most {} bytes; names at most {} bytes.",
        protocol::MAX_MESSAGE_SIZE,
        u16::MAX
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input_operations() {
        assert_eq!(parse_input("LIST"), Input::Operation(OpCode::List, None));
        assert_eq!(parse_input("  conn "), Input::Operation(OpCode::Conn, None));
        assert_eq!(
            parse_input("UPLD my notes.txt"),
            Input::Operation(OpCode::Upload, Some("my notes.txt".to_string()))
        );
        assert_eq!(
            parse_input("dwld   a.bin  "),
            Input::Operation(OpCode::Download, Some("a.bin".to_string()))
        );
    }

    #[test]
    fn test_parse_input_other() {
        assert_eq!(parse_input(""), Input::Empty);
        assert_eq!(parse_input("   "), Input::Empty);
        assert_eq!(parse_input("help"), Input::Help);
        assert_eq!(parse_input("?"), Input::Help);
        assert_eq!(parse_input("XXXX"), Input::Invalid("XXXX".to_string()));
        assert_eq!(parse_input("LISTS"), Input::Invalid("LISTS".to_string()));
    }
}

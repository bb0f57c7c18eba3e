//! Interactive session: one command per stdin line, one action at a time.

use crate::controller::{Controller, DetectionReport};
use crate::engine::FaceEngine;
use crate::upload::{DirectoryPicker, UploadError};
use anyhow::Result;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

const HELP: &str = "\
commands:
  start                    open the camera
  detect                   detect, match and annotate faces in the current frame
  upload <folder> <image>  add a photo to the library and rebuild the matcher
  status                   show library and camera state
  help                     show this list
  quit                     leave the session";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Detect,
    Upload {
        folder: String,
        image: Option<PathBuf>,
    },
    Status,
    Help,
    Quit,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command {0:?} (try `help`)")]
    Unknown(String),
}

impl Command {
    /// Parse one input line. For `upload`, the first word is the folder and
    /// the rest of the line is the image path.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim();
        let (word, rest) = line
            .split_once(char::is_whitespace)
            .map(|(w, r)| (w, r.trim()))
            .unwrap_or((line, ""));

        match word.to_ascii_lowercase().as_str() {
            "" => Err(ParseError::Empty),
            "start" => Ok(Self::Start),
            "detect" => Ok(Self::Detect),
            "status" => Ok(Self::Status),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" => Ok(Self::Quit),
            "upload" => {
                let (folder, image) = rest
                    .split_once(char::is_whitespace)
                    .map(|(f, i)| (f, i.trim()))
                    .unwrap_or((rest, ""));
                Ok(Self::Upload {
                    folder: folder.to_string(),
                    image: (!image.is_empty()).then(|| PathBuf::from(image)),
                })
            }
            _ => Err(ParseError::Unknown(word.to_string())),
        }
    }
}

/// Directory prompt on the session's input. The first answer is remembered
/// for the rest of the session.
pub struct PromptPicker<'a, R> {
    input: &'a mut Lines<R>,
    remembered: &'a mut Option<PathBuf>,
}

impl<'a, R> PromptPicker<'a, R> {
    pub fn new(input: &'a mut Lines<R>, remembered: &'a mut Option<PathBuf>) -> Self {
        Self { input, remembered }
    }
}

impl<R: AsyncBufRead + Unpin> DirectoryPicker for PromptPicker<'_, R> {
    async fn pick_directory(&mut self, default: &Path) -> Result<PathBuf, UploadError> {
        if let Some(dir) = self.remembered.as_ref() {
            return Ok(dir.clone());
        }

        print!("save under directory [{}] (`cancel` to abort): ", default.display());
        std::io::stdout().flush().map_err(UploadError::Prompt)?;

        let answer = self
            .input
            .next_line()
            .await
            .map_err(UploadError::Prompt)?
            .ok_or(UploadError::Cancelled)?;
        let answer = answer.trim();
        if answer.eq_ignore_ascii_case("cancel") {
            return Err(UploadError::Cancelled);
        }

        let dir = if answer.is_empty() {
            default.to_path_buf()
        } else {
            PathBuf::from(answer)
        };
        if !dir.is_dir() {
            return Err(UploadError::NotADirectory(dir));
        }

        tracing::info!(path = %dir.display(), "upload directory selected");
        *self.remembered = Some(dir.clone());
        Ok(dir)
    }

    fn notify(&mut self, message: &str) {
        println!("{message}");
    }
}

fn prompt() {
    print!("facematch> ");
    let _ = std::io::stdout().flush();
}

fn print_report(report: &DetectionReport) {
    if report.faces.is_empty() {
        println!("No faces detected");
    }
    for face in &report.faces {
        let b = &face.bbox;
        println!(
            "  {} at ({:.0}, {:.0}) {:.0}x{:.0}",
            face.best, b.x, b.y, b.width, b.height
        );
    }
    println!("Overlay written to {}", report.overlay_path.display());
}

/// Read and run commands until `quit`, end of input or Ctrl-C at the prompt.
///
/// Ctrl-C during an action drops that action and returns to the prompt.
pub async fn run<E: FaceEngine>(controller: &mut Controller<E>) -> Result<()> {
    let input = BufReader::new(tokio::io::stdin()).lines();

    println!("{HELP}");
    let cancelled = drive(controller, input, || async {
        // An unavailable signal handler leaves only `quit` and end of input
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    })
    .await?;

    tracing::info!(cancelled, "session finished");
    Ok(())
}

/// Command loop over `input`. `interrupt` yields a future that resolves on
/// the next interrupt; it is raced against the prompt and against every
/// action. Returns how many actions were cancelled.
async fn drive<E, R, F, Fut>(
    controller: &mut Controller<E>,
    mut input: Lines<R>,
    mut interrupt: F,
) -> Result<usize>
where
    E: FaceEngine,
    R: AsyncBufRead + Unpin,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut upload_root: Option<PathBuf> = None;
    let mut cancelled = 0;

    loop {
        prompt();
        let line = tokio::select! {
            line = input.next_line() => line?,
            _ = interrupt() => {
                println!();
                break;
            }
        };
        let Some(line) = line else {
            break;
        };

        let command = match Command::parse(&line) {
            Ok(Command::Quit) => break,
            Ok(command) => command,
            Err(ParseError::Empty) => continue,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };

        tokio::select! {
            result = execute(controller, command, &mut input, &mut upload_root) => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "command failed");
                }
            }
            _ = interrupt() => {
                tracing::warn!("action cancelled");
                println!("cancelled");
                cancelled += 1;
            }
        }
    }

    Ok(cancelled)
}

async fn execute<E: FaceEngine, R: AsyncBufRead + Unpin>(
    controller: &mut Controller<E>,
    command: Command,
    input: &mut Lines<R>,
    upload_root: &mut Option<PathBuf>,
) -> Result<()> {
    match command {
        Command::Start => match controller.start_capture().await {
            Ok(info) if info.already_started => println!("Camera already started"),
            Ok(info) => println!("Camera started: {} ({}x{})", info.device, info.width, info.height),
            Err(e) => println!("Camera unavailable: {e}"),
        },
        Command::Detect => match controller.detect().await {
            Ok(report) => print_report(&report),
            Err(e) => {
                tracing::error!(error = %e, "detection failed");
                println!("Detection failed: {e}");
            }
        },
        Command::Upload { folder, image } => {
            let mut picker = PromptPicker::new(input, upload_root);
            controller
                .upload(&folder, image.as_deref(), &mut picker)
                .await;
        }
        Command::Status => println!("{}", serde_json::to_string_pretty(&controller.status())?),
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
    Ok(())
}

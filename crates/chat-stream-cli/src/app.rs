use std::io::Write;

use chat_stream_harness::image::load_image;
use chat_stream_harness::{ContentBlock, Conversation, Role, Turn};
use tokio::io::AsyncBufRead;
use tracing::{debug, warn};

use crate::error::CliError;
use crate::prompt::{Prompter, TurnInput};

/// Runs the interactive loop until input ends.
///
/// Turn failures are reported on `out` and the loop goes on with the
/// transcript as it was, so the same question can be asked again. Only
/// terminal I/O errors end the loop early.
pub async fn run<R, W>(
    conversation: &mut Conversation,
    prompter: &mut Prompter<R, W>,
    verbose: bool,
) -> Result<(), CliError>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    while let Some(input) = prompter.next_input().await? {
        let turn = match build_turn(input).await {
            Ok(turn) => turn,
            Err(err) => {
                warn!(error = %err, "could not build turn");
                writeln!(prompter.out(), "error: {err}")?;
                continue;
            }
        };

        if let Err(err) = send(conversation, prompter.out(), turn, verbose).await {
            match err {
                CliError::Io(_) => return Err(err),
                CliError::Harness(err) => {
                    warn!(error = %err, "turn failed");
                    writeln!(prompter.out())?;
                    writeln!(prompter.out(), "error: {err}")?;
                }
            }
        }
    }
    debug!(
        turns = conversation.transcript().len(),
        "input closed, ending conversation"
    );
    Ok(())
}

/// Sends one turn and prints the reply. Any failure is returned.
pub async fn run_once<W: Write>(
    conversation: &mut Conversation,
    out: &mut W,
    input: TurnInput,
    verbose: bool,
) -> Result<(), CliError> {
    let turn = build_turn(input).await?;
    let result = send(conversation, out, turn, verbose).await;
    if result.is_err() {
        writeln!(out)?;
    }
    result
}

/// Image blocks come first, then the question.
async fn build_turn(input: TurnInput) -> Result<Turn, CliError> {
    let mut content = Vec::with_capacity(input.images.len() + 1);
    for source in &input.images {
        content.push(ContentBlock::image(load_image(source).await?));
    }
    content.push(ContentBlock::text(input.text));
    Ok(Turn::new(Role::User, content))
}

async fn send<W: Write>(
    conversation: &mut Conversation,
    out: &mut W,
    turn: Turn,
    verbose: bool,
) -> Result<(), CliError> {
    let request = conversation.request_for(&turn);
    if verbose {
        writeln!(out, "[request payload] {}", request.to_json()?)?;
    }

    write!(out, "[Assistant]: ")?;
    out.flush()?;
    let mut write_error = None;
    let result = conversation
        .send_request(turn, request, |fragment| {
            if write_error.is_some() {
                return;
            }
            if let Err(err) = write!(out, "{fragment}").and_then(|()| out.flush()) {
                write_error = Some(err);
            }
        })
        .await;
    if let Some(err) = write_error {
        return Err(err.into());
    }
    let response = result?;
    writeln!(out)?;
    debug!(
        id = %response.id,
        stop_reason = ?response.stop_reason,
        output_tokens = response.usage.output_tokens,
        "reply printed"
    );
    Ok(())
}

use std::io::Write;

use tokio::io::{AsyncBufRead, AsyncBufReadExt as _, Lines};

/// What the user asked for in one turn, before images are loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnInput {
    /// Image sources (paths or URLs) in the order they were entered.
    pub images: Vec<String>,
    pub text: String,
}

/// Line-oriented interactive prompts.
///
/// Every question is printed to `out`; answers are read one line at a time and
/// trimmed. End of input ends the conversation.
pub struct Prompter<R, W> {
    lines: Lines<R>,
    out: W,
}

impl<R, W> Prompter<R, W>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    pub fn new(reader: R, out: W) -> Self {
        Self {
            lines: reader.lines(),
            out,
        }
    }

    /// Writer the prompts go to, also used for assistant output.
    pub fn out(&mut self) -> &mut W {
        &mut self.out
    }

    pub fn into_out(self) -> W {
        self.out
    }

    async fn ask(&mut self, question: &str) -> std::io::Result<Option<String>> {
        write!(self.out, "\n{question}")?;
        self.out.flush()?;
        Ok(self
            .lines
            .next_line()
            .await?
            .map(|line| line.trim().to_string()))
    }

    fn say(&mut self, message: &str) -> std::io::Result<()> {
        writeln!(self.out, "{message}")
    }

    /// Asks for the next turn. Returns `None` at end of input.
    pub async fn next_input(&mut self) -> std::io::Result<Option<TurnInput>> {
        loop {
            let Some(choice) = self
                .ask("Choose your message type - Text (enter 1) or Image (enter 2): ")
                .await?
            else {
                return Ok(None);
            };
            match choice.as_str() {
                "1" => {
                    let Some(text) = self.ask_non_empty("Enter your message: ").await? else {
                        return Ok(None);
                    };
                    return Ok(Some(TurnInput {
                        images: Vec::new(),
                        text,
                    }));
                }
                "2" => return self.image_input().await,
                _ => self.say("invalid option. enter 1 or 2.")?,
            }
        }
    }

    async fn image_input(&mut self) -> std::io::Result<Option<TurnInput>> {
        let mut images = Vec::new();
        loop {
            let Some(source) = self
                .ask_non_empty("Enter the image source (local path or url): ")
                .await?
            else {
                return Ok(None);
            };
            images.push(source);

            loop {
                let Some(answer) = self
                    .ask("Would you like to add more images? enter yes or no: ")
                    .await?
                else {
                    return Ok(None);
                };
                match answer.to_ascii_lowercase().as_str() {
                    "yes" | "y" => break,
                    "no" | "n" => {
                        let Some(text) = self
                            .ask_non_empty("What would you like to ask about the image(s)? : ")
                            .await?
                        else {
                            return Ok(None);
                        };
                        return Ok(Some(TurnInput { images, text }));
                    }
                    _ => self.say("invalid option. enter yes or no.")?,
                }
            }
        }
    }

    async fn ask_non_empty(&mut self, question: &str) -> std::io::Result<Option<String>> {
        loop {
            match self.ask(question).await? {
                None => return Ok(None),
                Some(answer) if answer.is_empty() => self.say("input must not be empty.")?,
                Some(answer) => return Ok(Some(answer)),
            }
        }
    }
}

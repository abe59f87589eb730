use docchat_rag::{Conversation, RagPipeline};
use rustyline::{DefaultEditor, error::ReadlineError};

use crate::print_answer;

const HELP: &str = "commands: /history, /help, /quit";

/// Read questions until `/quit` or end of input, answering each against the
/// configured collection.
pub async fn run(pipeline: &RagPipeline) -> anyhow::Result<()> {
    let mut editor = DefaultEditor::new()?;
    let mut conversation = Conversation::new();
    println!("docchat on '{}'. {}", pipeline.config().collection, HELP);

    loop {
        let line = match editor.readline("You: ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(line);

        match line {
            "/quit" | "/exit" => break,
            "/help" => println!("{}", HELP),
            "/history" => {
                if conversation.is_empty() {
                    println!("(no messages yet)");
                } else {
                    println!("{}", conversation.transcript());
                }
            }
            question => match pipeline.query(question).await {
                Ok(answer) => {
                    conversation.push_user(question);
                    conversation.push_assistant(answer.text.clone());
                    print!("Bot: ");
                    print_answer(&answer);
                }
                Err(err) => eprintln!("error ({}): {}", err.stage(), err),
            },
        }
    }
    Ok(())
}

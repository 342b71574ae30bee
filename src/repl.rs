use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

const FENCE: &str = "```";

/// What the user typed at the prompt.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Input {
    Message(String),
    Skip,
    Quit,
}

/// Read one message from `lines`.
///
/// A line opening a fenced code block keeps reading until the closing fence,
/// so pasted Python arrives as a single message.
pub(crate) async fn next_input<R>(lines: &mut Lines<R>) -> std::io::Result<Input>
where
    R: AsyncBufRead + Unpin,
{
    let Some(line) = lines.next_line().await? else {
        return Ok(Input::Quit);
    };
    let trimmed = line.trim();
    if trimmed == "exit" || trimmed == "quit" {
        return Ok(Input::Quit);
    }
    if trimmed.is_empty() {
        return Ok(Input::Skip);
    }
    if !opens_fence(&line) {
        return Ok(Input::Message(trimmed.to_owned()));
    }

    let mut message = line;
    while let Some(next) = lines.next_line().await? {
        message.push('\n');
        message.push_str(&next);
        if next.trim_start().starts_with(FENCE) {
            break;
        }
    }
    Ok(Input::Message(message))
}

// An odd number of fences means the block continues on later lines.
fn opens_fence(line: &str) -> bool {
    line.matches(FENCE).count() % 2 == 1
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncBufReadExt, BufReader};

    use super::*;

    async fn read_all(text: &str) -> Vec<Input> {
        let mut lines = BufReader::new(text.as_bytes()).lines();
        let mut out = Vec::new();
        loop {
            let input = next_input(&mut lines).await.unwrap();
            let done = input == Input::Quit;
            out.push(input);
            if done {
                return out;
            }
        }
    }

    #[tokio::test]
    async fn single_lines_are_messages() {
        let inputs = read_all("lint this\n\n  hello  \n").await;
        assert_eq!(
            inputs,
            vec![
                Input::Message("lint this".into()),
                Input::Skip,
                Input::Message("hello".into()),
                Input::Quit,
            ]
        );
    }

    #[tokio::test]
    async fn fenced_block_is_one_message() {
        let text = "refactor this ```python\ndef f(x,y):\n    return x+y\n```\nquit\nignored\n";
        let inputs = read_all(text).await;
        assert_eq!(
            inputs,
            vec![
                Input::Message(
                    "refactor this ```python\ndef f(x,y):\n    return x+y\n```".into()
                ),
                Input::Quit,
            ]
        );
    }

    #[tokio::test]
    async fn inline_fence_pair_does_not_open_block() {
        let inputs = read_all("what does ```x = 1``` do?\n").await;
        assert_eq!(inputs[0], Input::Message("what does ```x = 1``` do?".into()));
    }

    #[tokio::test]
    async fn unterminated_block_ends_at_eof() {
        let inputs = read_all("```\nimport os").await;
        assert_eq!(inputs[0], Input::Message("```\nimport os".into()));
        assert_eq!(inputs[1], Input::Quit);
    }

    #[tokio::test]
    async fn exit_words_quit() {
        assert_eq!(read_all("exit\n").await, vec![Input::Quit]);
        assert_eq!(read_all("  quit \n").await, vec![Input::Quit]);
    }
}

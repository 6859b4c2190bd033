use std::io::{self, Write};
use rustyline::{
    Config as RustyConfig, Editor, error::ReadlineError,
    completion::{Completer, Pair},
    hint::{Hinter, HistoryHinter},
    highlight::{Highlighter, MatchingBracketHighlighter, CmdKind},
    validate::Validator,
    Helper, history::FileHistory
};
use colored::Colorize;
use crate::{
    config::Config,
    error::ChatError,
    llm::{Backend, HttpBackend},
    message::Role,
    session::ChatSession,
    store::Store,
};

const SPECIAL_COMMANDS: [&str; 10] = [
    "context", "exit", "help", "key", "model", "models", "reset", "retry", "room", "rooms",
];
const ROOM_SUBCOMMANDS: [&str; 2] = ["new", "delete"];

struct ChatrCompleter {
    models: Vec<String>,
    hinter: HistoryHinter,
    bracket_highlighter: MatchingBracketHighlighter,
    masking: bool,
}

impl ChatrCompleter {
    fn new() -> Self {
        Self {
            models: Vec::new(),
            hinter: HistoryHinter {},
            bracket_highlighter: MatchingBracketHighlighter::new(),
            masking: false,
        }
    }
}

impl Helper for ChatrCompleter {}

impl Completer for ChatrCompleter {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let (start, word) = word_at(line, pos);
        let to_pairs = |options: Vec<&str>| -> Vec<Pair> {
            options
                .into_iter()
                .filter(|option| option.starts_with(word))
                .map(|option| Pair { display: option.to_string(), replacement: option.to_string() })
                .collect()
        };

        let candidates = if start == 0 || line[..start].trim().is_empty() {
            to_pairs(SPECIAL_COMMANDS.to_vec())
        } else if line.starts_with("model ") {
            to_pairs(self.models.iter().map(String::as_str).collect())
        } else if line.starts_with("room ") && line[5..start].trim().is_empty() {
            to_pairs(ROOM_SUBCOMMANDS.to_vec())
        } else {
            Vec::new()
        };
        Ok((start, candidates))
    }
}

// Start and text of the word under the cursor.
fn word_at(line: &str, pos: usize) -> (usize, &str) {
    if pos == 0 || line[..pos].ends_with(' ') {
        return (pos, "");
    }
    let before_cursor = &line[..pos];
    match before_cursor.rfind(' ') {
        Some(last_space) => (last_space + 1, &before_cursor[last_space + 1..]),
        None => (0, before_cursor),
    }
}

impl Hinter for ChatrCompleter {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, ctx: &rustyline::Context<'_>) -> Option<String> {
        if self.masking {
            return None;
        }
        self.hinter.hint(line, pos, ctx)
    }
}

impl Highlighter for ChatrCompleter {
    fn highlight_hint<'h>(&self, hint: &'h str) -> std::borrow::Cow<'h, str> {
        std::borrow::Cow::Owned(hint.truecolor(128, 128, 128).to_string())
    }

    fn highlight<'l>(&self, line: &'l str, pos: usize) -> std::borrow::Cow<'l, str> {
        if self.masking {
            return std::borrow::Cow::Owned("*".repeat(line.chars().count()));
        }
        self.bracket_highlighter.highlight(line, pos)
    }

    fn highlight_char(&self, line: &str, pos: usize, forced: CmdKind) -> bool {
        self.masking || self.bracket_highlighter.highlight_char(line, pos, forced)
    }
}

impl Validator for ChatrCompleter {}

/// A line typed at the prompt.
#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Exit,
    Help,
    Context,
    Reset,
    Retry,
    /// `key` alone prompts for a key, `key <token>` verifies the token.
    Key(Option<&'a str>),
    ClearKey,
    Models,
    Model(&'a str),
    Rooms,
    NewRoom(&'a str),
    SwitchRoom(u64),
    DeleteRoom(u64),
    Invalid(String),
    Empty,
    Chat(&'a str),
}

pub fn parse_command(input: &str) -> Command<'_> {
    let input = input.trim();
    let (head, rest) = match input.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (input, ""),
    };

    match (head, rest) {
        ("", _) => Command::Empty,
        ("exit", "") => Command::Exit,
        ("help", "") => Command::Help,
        ("context", "") => Command::Context,
        ("reset", "") => Command::Reset,
        ("retry", "") => Command::Retry,
        ("models", "") => Command::Models,
        ("rooms", "") => Command::Rooms,
        ("key", "") => Command::Key(None),
        ("key", "clear") => Command::ClearKey,
        ("key", token) if is_single_word(token) => Command::Key(Some(token)),
        ("model", "") => Command::Invalid("Usage: model <id>".to_string()),
        ("model", id) if is_single_word(id) => Command::Model(id),
        ("room", rest) => parse_room_command(input, rest),
        _ => Command::Chat(input),
    }
}

fn is_single_word(text: &str) -> bool {
    !text.contains(char::is_whitespace)
}

// Anything after `room` that is not a known shape is ordinary chat text.
fn parse_room_command<'a>(input: &'a str, rest: &'a str) -> Command<'a> {
    let (sub, arg) = match rest.split_once(char::is_whitespace) {
        Some((sub, arg)) => (sub, arg.trim()),
        None => (rest, ""),
    };

    match (sub, arg) {
        ("", _) => Command::Invalid("Usage: room <id> | room new [name] | room delete <id>".to_string()),
        ("new", name) => Command::NewRoom(name),
        ("delete", "") => Command::Invalid("Usage: room delete <id>".to_string()),
        ("delete", id) => match id.parse() {
            Ok(id) => Command::DeleteRoom(id),
            Err(_) => Command::Chat(input),
        },
        (id, "") => match id.parse() {
            Ok(id) => Command::SwitchRoom(id),
            Err(_) => Command::Chat(input),
        },
        _ => Command::Chat(input),
    }
}

pub fn run_cli(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let rusty_config = RustyConfig::builder()
    .completion_type(rustyline::CompletionType::List)
    .build();

    let mut rl: Editor<ChatrCompleter, FileHistory> = Editor::with_config(rusty_config)?;
    rl.set_helper(Some(ChatrCompleter::new()));

    let store = Store::open(config.data_dir.as_deref())?;
    log::debug!("Data directory: {}", store.dir().display());
    let backend = HttpBackend::new(&config.api_addr, &config.model_filter);
    let mut session = ChatSession::open(&config, store, backend);

    print_banner(&session);

    if !session.has_api_key() {
        println!("{}", "Enter your OpenAI API key (leave empty to skip).".cyan());
        prompt_api_key(&mut rl, &mut session)?;
    }

    loop {
        match rl.readline(&prompt(&session)) {
            Ok(line) => {
                let input = line.trim();
                let command = parse_command(input);
                if !matches!(command, Command::Empty | Command::Key(Some(_))) {
                    rl.add_history_entry(input)?;
                }
                match command {
                    Command::Empty => continue,
                    Command::Exit => break,
                    Command::Help => print_help(),
                    Command::Context => print_context(&session),
                    Command::Reset => {
                        session.reset();
                        println!("{}", "Chat history cleared.".yellow());
                    },
                    Command::Retry => {
                        let result = session.resend(&mut print_delta);
                        finish_reply(result);
                    },
                    Command::Key(None) => prompt_api_key(&mut rl, &mut session)?,
                    Command::Key(Some(token)) => verify_key(&mut session, token),
                    Command::ClearKey => {
                        session.clear_api_key();
                        println!("{}", "API key removed.".yellow());
                    },
                    Command::Models => match session.refresh_models() {
                        Ok(()) => print_models(session.possible_models(), session.model()),
                        Err(e) => println!("{}", format!("Failed to list models: {}", e).red()),
                    },
                    Command::Model(id) => {
                        if !session.possible_models().is_empty()
                            && !session.possible_models().iter().any(|model| model == id)
                        {
                            println!("{}", format!("'{}' is not in the model list; using it anyway.", id).yellow());
                        }
                        session.select_model(id);
                        println!("{}", format!("Model set to {}", session.model()).truecolor(128, 128, 128));
                    },
                    Command::Rooms => print_rooms(&session),
                    Command::NewRoom(name) => match session.create_room(name) {
                        Ok(room) => println!("{}", format!("Created room [{}] {}", room.id, room.name).green()),
                        Err(e) => println!("{}", e.to_string().red()),
                    },
                    Command::SwitchRoom(id) => match session.switch_room(id) {
                        Ok(room) => println!("{}", format!("Switched to room [{}] {}", room.id, room.name).truecolor(128, 128, 128)),
                        Err(e) => println!("{}", e.to_string().red()),
                    },
                    Command::DeleteRoom(id) => match session.delete_room(id) {
                        Ok(room) => println!("{}", format!("Deleted room [{}] {}", room.id, room.name).yellow()),
                        Err(e) => println!("{}", e.to_string().red()),
                    },
                    Command::Invalid(message) => println!("{}", message.red()),
                    Command::Chat(text) => {
                        let result = session.send(text, &mut print_delta);
                        finish_reply(result);
                    }
                }
                if let Some(helper) = rl.helper_mut() {
                    helper.models = session.possible_models().to_vec();
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(Box::new(e)),
        }
    }

    println!("{}", "Goodbye!".blue());
    Ok(())
}

fn prompt<B: Backend>(session: &ChatSession<B>) -> String {
    let room = session
        .current_room()
        .map(|room| room.name.clone())
        .unwrap_or_default();
    format!("{}> ", room).green().to_string()
}

fn prompt_api_key<B: Backend>(
    rl: &mut Editor<ChatrCompleter, FileHistory>,
    session: &mut ChatSession<B>,
) -> Result<(), ReadlineError> {
    set_masking(rl, true);
    let read = rl.readline(&"API key> ".cyan().to_string());
    set_masking(rl, false);

    match read {
        Ok(line) => {
            verify_key(session, line.trim());
            Ok(())
        }
        Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => Ok(()),
        Err(e) => Err(e),
    }
}

fn set_masking(rl: &mut Editor<ChatrCompleter, FileHistory>, masking: bool) {
    if let Some(helper) = rl.helper_mut() {
        helper.masking = masking;
    }
}

fn verify_key<B: Backend>(session: &mut ChatSession<B>, candidate: &str) {
    if candidate.is_empty() {
        return;
    }
    println!("{}", "Checking...".truecolor(128, 128, 128));
    match session.set_api_key(candidate) {
        Ok(()) => println!(
            "{}",
            format!(
                "API key {} accepted, {} models available.",
                session.masked_api_key().unwrap_or_default(),
                session.possible_models().len()
            )
            .green()
        ),
        Err(e) => {
            log::debug!("Key verification failed: {}", e);
            println!("{}", "Please check your API key again!".red());
        }
    }
}

fn print_delta(delta: &str) {
    print!("{}", delta.yellow());
    let _ = io::stdout().flush();
}

fn finish_reply(result: Result<&crate::message::Message, ChatError>) {
    match result {
        Ok(_) => println!(),
        Err(e) => println!("{}", e.to_string().red()),
    }
}

fn print_banner<B: Backend>(session: &ChatSession<B>) {
    println!(
        "{}",
        format!("chatr v{} · model {}", env!("CARGO_PKG_VERSION"), session.model()).blue()
    );
    if let Some(masked) = session.masked_api_key() {
        println!("{}", format!("API Key: {}", masked).truecolor(128, 128, 128));
    }
    println!("{}", "Type 'help' for commands.".truecolor(128, 128, 128));
}

fn print_help() {
    println!(
        "{}",
        "Workflow:\n\
        - Type a message and press Enter; the reply streams in as it is written\n\
        \n\
        Available commands:\n\
        - key [token]: Set the OpenAI API key (verified before use)\n\
        - key clear: Forget the stored API key\n\
        - models: List the models available to your key\n\
        - model <id>: Use a different model\n\
        - rooms: List chat rooms\n\
        - room new [name]: Create a room and switch to it\n\
        - room <id>: Switch to a room\n\
        - room delete <id>: Delete a room and its messages\n\
        - retry: Ask again for the last reply\n\
        - reset: Clear chat history of this room\n\
        - context: Show current conversation context\n\
        - exit: Exit the program\n\
        - help: Show this help message\n"
            .blue()
    );
}

fn print_context<B: Backend>(session: &ChatSession<B>) {
    if session.messages().len() == 1 {
        println!(
            "{}",
            "No conversation history yet (only system prompt).".truecolor(128, 128, 128)
        );
        return;
    }
    println!("{}", "--- Current Chat Context ---".yellow());
    for (i, msg) in session.messages().iter().skip(1).enumerate() {
        println!(
            "{}[{}] {}:",
            "--- ".yellow(),
            i + 1,
            msg.role.as_str().to_uppercase().cyan()
        );
        match msg.role {
            Role::Assistant => println!("{}", format!("👉 {}", msg.content.trim()).yellow()),
            _ => println!("{}", msg.content.trim().white()),
        }
    }
    println!("{}", "--- End of Context ---".yellow());
}

fn print_models(models: &[String], selected: &str) {
    if models.is_empty() {
        println!("{}", "No models available.".truecolor(128, 128, 128));
        return;
    }
    for model in models {
        if model == selected {
            println!("{}", format!("* {}", model).green());
        } else {
            println!("  {}", model);
        }
    }
}

fn print_rooms<B: Backend>(session: &ChatSession<B>) {
    let current = session.current_room().map(|room| room.id);
    for room in session.rooms() {
        let line = format!("[{}] {}", room.id, room.name);
        if Some(room.id) == current {
            println!("{}", format!("* {}", line).green());
        } else {
            println!("  {}", line);
        }
    }
}

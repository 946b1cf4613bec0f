//! Console command parsing and dispatch onto the sheet API.

use anyhow::{anyhow, bail, Context};
use std::path::PathBuf;

use websheet_core::CellCoord;
use websheet_engine::{InputTable, JsonImporter, OutputTable, PermKind, PermTarget, Sheet};

pub const HELP: &str = "\
commands:
  = <formula>                         evaluate a formula as the current user
  login <user>                        act as <user> (created if missing)
  users | adduser <user> | deluser <user>
  tables | keywords
  create <table> <col,col,..> [description]
  drop <table>
  show <table>                        evaluated, censored cells
  source <table>                      formula sources
  get <table.row.col> | canread <table.row.col>
  set <table.row.col> <formula>
  addrow <table> [index] | delrow <table> <row>
  perm <table> <read|write|init|add|del> <column|row> [formula]
  owner <table> <row> <user>
  import <file.json>
  poll | save | help | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Eval(String),
    Login(String),
    Users,
    AddUser(String),
    DeleteUser(String),
    Tables,
    Keywords,
    Create {
        table: String,
        columns: Vec<String>,
        description: String,
    },
    Drop(String),
    Show(String),
    Source(String),
    Get(CellCoord),
    CanRead(CellCoord),
    Set(CellCoord, String),
    AddRow(String, Option<usize>),
    DeleteRow(String, usize),
    Perm {
        table: String,
        kind: PermKind,
        target: PermTarget,
        source: String,
    },
    Owner(String, usize, String),
    Import(PathBuf),
    Poll,
    Save,
    Help,
    Quit,
}

/// Split off the first whitespace-delimited word
fn word(input: &str) -> (&str, &str) {
    let input = input.trim_start();
    match input.find(char::is_whitespace) {
        Some(i) => (&input[..i], input[i..].trim_start()),
        None => (input, ""),
    }
}

fn required<'a>(input: &'a str, what: &str) -> anyhow::Result<(&'a str, &'a str)> {
    match word(input) {
        ("", _) => bail!("missing {}", what),
        parts => Ok(parts),
    }
}

fn cell(label: &str) -> anyhow::Result<CellCoord> {
    CellCoord::from_label(label).ok_or_else(|| anyhow!("expected table.row.column, got '{}'", label))
}

fn index(text: &str) -> anyhow::Result<usize> {
    text.parse()
        .with_context(|| format!("expected a row index, got '{}'", text))
}

impl Command {
    /// Parse one console line; `None` for a blank line
    pub fn parse(line: &str) -> anyhow::Result<Option<Command>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        if let Some(formula) = line.strip_prefix('=') {
            return Ok(Some(Command::Eval(formula.trim().to_string())));
        }

        let (name, rest) = word(line);
        let command = match name {
            "login" => Command::Login(required(rest, "user")?.0.to_string()),
            "users" => Command::Users,
            "adduser" => Command::AddUser(required(rest, "user")?.0.to_string()),
            "deluser" => Command::DeleteUser(required(rest, "user")?.0.to_string()),
            "tables" => Command::Tables,
            "keywords" => Command::Keywords,
            "create" => {
                let (table, rest) = required(rest, "table")?;
                let (columns, description) = required(rest, "columns")?;
                Command::Create {
                    table: table.to_string(),
                    columns: columns.split(',').map(|c| c.trim().to_string()).collect(),
                    description: description.to_string(),
                }
            }
            "drop" => Command::Drop(required(rest, "table")?.0.to_string()),
            "show" => Command::Show(required(rest, "table")?.0.to_string()),
            "source" => Command::Source(required(rest, "table")?.0.to_string()),
            "get" => Command::Get(cell(required(rest, "cell")?.0)?),
            "canread" => Command::CanRead(cell(required(rest, "cell")?.0)?),
            "set" => {
                let (label, formula) = required(rest, "cell")?;
                Command::Set(cell(label)?, formula.to_string())
            }
            "addrow" => {
                let (table, at) = required(rest, "table")?;
                let at = match word(at).0 {
                    "" => None,
                    at => Some(index(at)?),
                };
                Command::AddRow(table.to_string(), at)
            }
            "delrow" => {
                let (table, rest) = required(rest, "table")?;
                Command::DeleteRow(table.to_string(), index(required(rest, "row")?.0)?)
            }
            "perm" => {
                let (table, rest) = required(rest, "table")?;
                let (kind, rest) = required(rest, "permission kind")?;
                let (target, source) = required(rest, "column or 'row'")?;
                Command::Perm {
                    table: table.to_string(),
                    kind: kind.parse()?,
                    target: PermTarget::parse(target),
                    source: source.to_string(),
                }
            }
            "owner" => {
                let (table, rest) = required(rest, "table")?;
                let (row, rest) = required(rest, "row")?;
                let (user, _) = required(rest, "user")?;
                Command::Owner(table.to_string(), index(row)?, user.to_string())
            }
            "import" => Command::Import(PathBuf::from(required(rest, "file")?.0)),
            "poll" => Command::Poll,
            "save" => Command::Save,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => bail!("unknown command '{}' (try 'help')", other),
        };
        Ok(Some(command))
    }
}

/// Mutable console state besides the sheet
#[derive(Debug, Clone)]
pub struct Session {
    pub user: String,
    pub save_file: PathBuf,
}

fn format_grid(columns: &[String], rows: Vec<Vec<String>>) -> String {
    let mut lines = vec![format!("# | {}", columns.join(" | "))];
    for (i, row) in rows.into_iter().enumerate() {
        lines.push(format!("{} | {}", i, row.join(" | ")));
    }
    lines.join("\n")
}

pub fn format_output(table: &OutputTable) -> String {
    let rows = table
        .rows
        .iter()
        .map(|row| row.iter().map(|cell| cell.to_string()).collect())
        .collect();
    format!(
        "{} ({}): {}\n{}",
        table.name,
        table.owner,
        table.description,
        format_grid(&table.columns, rows)
    )
}

pub fn format_input(table: &InputTable) -> String {
    let rows = table
        .rows
        .iter()
        .map(|row| {
            row.cells
                .iter()
                .map(|cell| match &cell.error {
                    Some(error) => format!("{} !! {}", cell.source, error),
                    None => cell.source.clone(),
                })
                .collect()
        })
        .collect();
    format!(
        "{} ({}): {}\n{}",
        table.name,
        table.owner,
        table.description,
        format_grid(&table.columns, rows)
    )
}

/// Run one command; returns the text to print
pub fn execute(command: Command, sheet: &mut Sheet, session: &mut Session) -> anyhow::Result<String> {
    let user = session.user.clone();
    let user = user.as_str();

    let reply = match command {
        Command::Eval(formula) => sheet.eval_string(user, &formula)?.to_string(),
        Command::Login(name) => {
            sheet.create_user(&name);
            session.user = name;
            format!("acting as {}", session.user)
        }
        Command::Users => sheet
            .list_users()
            .into_iter()
            .map(|u| format!("{}: {}", u.user, u.tables.join(", ")))
            .collect::<Vec<_>>()
            .join("\n"),
        Command::AddUser(name) => match sheet.create_user(&name) {
            true => format!("created user {}", name),
            false => format!("user {} already exists", name),
        },
        Command::DeleteUser(name) => match sheet.delete_user(&name) {
            true => format!("deleted user {}", name),
            false => format!("cannot delete user {}", name),
        },
        Command::Tables => sheet
            .list_tables()
            .into_iter()
            .map(|t| format!("{} ({}): {}", t.name, t.owner, t.description))
            .collect::<Vec<_>>()
            .join("\n"),
        Command::Keywords => serde_json::to_string_pretty(&sheet.list_keywords())?,
        Command::Create {
            table,
            columns,
            description,
        } => match sheet.create_table(user, &table, &description, columns, None)? {
            true => format!("created table {}", table),
            false => format!("table {} already exists", table),
        },
        Command::Drop(table) => {
            sheet.delete_table(user, &table)?;
            format!("dropped table {}", table)
        }
        Command::Show(table) => format_output(&sheet.get_output_table(user, &table)?),
        Command::Source(table) => format_input(&sheet.get_input_table(user, &table)?),
        Command::Get(coord) => sheet
            .get_cell(user, &coord.table, coord.row, &coord.column)?
            .to_string(),
        Command::CanRead(coord) => sheet
            .can_read_cell(user, &coord.table, coord.row, &coord.column)?
            .to_string(),
        Command::Set(coord, formula) => {
            sheet.write_cell(user, &coord.table, coord.row, &coord.column, &formula)?;
            format!("{} = {}", coord, formula)
        }
        Command::AddRow(table, at) => {
            let row = sheet.add_row(user, &table, at)?;
            format!("added row {} to {}", row, table)
        }
        Command::DeleteRow(table, row) => {
            sheet.delete_row(user, &table, row)?;
            format!("deleted row {} of {}", row, table)
        }
        Command::Perm {
            table,
            kind,
            target,
            source,
        } => {
            sheet.write_perm(user, &table, kind, target, &source)?;
            format!("{} permission of {} updated", kind, table)
        }
        Command::Owner(table, row, owner) => {
            sheet.write_owner(user, &table, row, &owner)?;
            format!("row {} of {} now owned by {}", row, table, owner)
        }
        Command::Import(path) => {
            let names = sheet.import(user, &mut JsonImporter::new(path))?;
            format!("imported {}", names.join(", "))
        }
        Command::Poll => format!("{} expired cells", sheet.poll_time()),
        Command::Save => {
            sheet.save(&session.save_file)?;
            format!("saved to {}", session.save_file.display())
        }
        Command::Help => HELP.to_string(),
        Command::Quit => String::new(),
    };
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Command {
        Command::parse(line).unwrap().unwrap()
    }

    fn session() -> Session {
        Session {
            user: "alice".into(),
            save_file: std::env::temp_dir().join("websheet-console-test.json"),
        }
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("   ").unwrap(), None);
        assert_eq!(parse("= 1 + 1"), Command::Eval("1 + 1".into()));
        assert_eq!(
            parse("create Paper title,author  Accepted papers"),
            Command::Create {
                table: "Paper".into(),
                columns: vec!["title".into(), "author".into()],
                description: "Accepted papers".into(),
            }
        );
        assert_eq!(
            parse("set Paper.3.title \"A B\" + \"C\""),
            Command::Set(CellCoord::new("Paper", 3, "title"), "\"A B\" + \"C\"".into())
        );
        assert_eq!(parse("addrow Paper"), Command::AddRow("Paper".into(), None));
        assert_eq!(parse("addrow Paper 2"), Command::AddRow("Paper".into(), Some(2)));
        assert_eq!(
            parse("perm Paper read row owner == user"),
            Command::Perm {
                table: "Paper".into(),
                kind: PermKind::Read,
                target: PermTarget::Row,
                source: "owner == user".into(),
            }
        );
        assert_eq!(
            parse("owner Paper 0 bob"),
            Command::Owner("Paper".into(), 0, "bob".into())
        );
        assert_eq!(parse("exit"), Command::Quit);
    }

    #[test]
    fn test_parse_errors() {
        for line in [
            "frobnicate",
            "set Paper.x.title 1",
            "get Paper",
            "delrow Paper",
            "delrow Paper two",
            "perm Paper share title true",
            "create",
        ] {
            assert!(Command::parse(line).is_err(), "{}", line);
        }
    }

    #[test]
    fn test_execute_session() {
        let mut sheet = Sheet::default();
        let mut session = session();
        let mut run = |line: &str, sheet: &mut Sheet| {
            let command = parse(line);
            execute(command, sheet, &mut session)
        };

        run("create T a,b", &mut sheet).unwrap();
        run("addrow T", &mut sheet).unwrap();
        run("set T.0.a 20", &mut sheet).unwrap();
        run("set T.0.b a + 1", &mut sheet).unwrap();
        assert_eq!(run("get T.0.b", &mut sheet).unwrap(), "21");
        assert_eq!(run("= sum(T.a)", &mut sheet).unwrap(), "20");
        assert_eq!(run("show T", &mut sheet).unwrap(), "T (alice): \n# | a | b\n0 | 20 | 21");

        run("perm T read a owner == user", &mut sheet).unwrap();
        run("login bob", &mut sheet).unwrap();
        assert_eq!(run("canread T.0.a", &mut sheet).unwrap(), "false");
        assert_eq!(run("get T.0.a", &mut sheet).unwrap(), "[[censored]]");
        assert!(run("drop T", &mut sheet).is_err());
        assert!(run("users", &mut sheet).unwrap().contains("bob"));
    }

    #[test]
    fn test_format_input_shows_errors() {
        let mut sheet = Sheet::default();
        let mut session = session();
        for line in ["create T a", "addrow T", "set T.0.a 1 +"] {
            execute(parse(line), &mut sheet, &mut session).unwrap();
        }
        let text = execute(parse("source T"), &mut sheet, &mut session).unwrap();
        assert!(text.contains("1 + !! "));
    }
}

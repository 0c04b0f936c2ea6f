use std::env;
use std::process::ExitCode;

use ink_epub::{toc_store_path, ContentItem, Epub, EpubError, EpubOptions, ItemBody, Toc};

#[derive(Clone, Debug)]
enum Json {
    Null,
    Bool(bool),
    Num(usize),
    Int(i64),
    Str(String),
    Arr(Vec<Json>),
    Obj(Vec<(String, Json)>),
}

impl Json {
    fn render(&self, pretty: bool) -> String {
        let mut out = String::new();
        self.write_into(&mut out, pretty, 0);
        out
    }

    fn write_into(&self, out: &mut String, pretty: bool, depth: usize) {
        match self {
            Json::Null => out.push_str("null"),
            Json::Bool(v) => out.push_str(if *v { "true" } else { "false" }),
            Json::Num(v) => out.push_str(&v.to_string()),
            Json::Int(v) => out.push_str(&v.to_string()),
            Json::Str(v) => write_json_string(out, v),
            Json::Arr(items) => {
                out.push('[');
                if !items.is_empty() && pretty {
                    out.push('\n');
                }
                for (idx, item) in items.iter().enumerate() {
                    if pretty {
                        write_indent(out, depth + 1);
                    }
                    item.write_into(out, pretty, depth + 1);
                    if idx + 1 != items.len() {
                        out.push(',');
                    }
                    if pretty {
                        out.push('\n');
                    }
                }
                if !items.is_empty() && pretty {
                    write_indent(out, depth);
                }
                out.push(']');
            }
            Json::Obj(fields) => {
                out.push('{');
                if !fields.is_empty() && pretty {
                    out.push('\n');
                }
                for (idx, (key, value)) in fields.iter().enumerate() {
                    if pretty {
                        write_indent(out, depth + 1);
                    }
                    write_json_string(out, key);
                    out.push(':');
                    if pretty {
                        out.push(' ');
                    }
                    value.write_into(out, pretty, depth + 1);
                    if idx + 1 != fields.len() {
                        out.push(',');
                    }
                    if pretty {
                        out.push('\n');
                    }
                }
                if !fields.is_empty() && pretty {
                    write_indent(out, depth);
                }
                out.push('}');
            }
        }
    }
}

fn write_indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn write_json_string(out: &mut String, s: &str) {
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c <= '\u{1f}' => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

fn main() -> ExitCode {
    match run(env::args().collect()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("error: {}", msg);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Vec<String>) -> Result<(), String> {
    let mut rest = args.into_iter().skip(1).collect::<Vec<_>>();
    let pretty = pop_flag(&mut rest, "--pretty");

    if rest.is_empty() || rest[0] == "--help" || rest[0] == "-h" {
        print_help();
        return Ok(());
    }

    let cmd = rest.remove(0);
    let output = match cmd.as_str() {
        "info" => {
            let path = first_arg(&rest, "info requires <epub_path>")?;
            let epub = open(&path)?;
            let field = |name: &str| {
                (
                    name.to_string(),
                    epub.metadata(name)
                        .map_or(Json::Null, |v| Json::Str(v.to_string())),
                )
            };
            let cover = epub.cover_filename();
            Json::Obj(vec![
                ("epub".to_string(), Json::Str(path)),
                field("dc:title"),
                field("dc:creator"),
                field("dc:language"),
                field("dc:publisher"),
                (
                    "cover".to_string(),
                    if cover.is_empty() {
                        Json::Null
                    } else {
                        Json::Str(cover)
                    },
                ),
                ("spine_length".to_string(), Json::Num(epub.spine_length())),
                (
                    "obfuscated_resources".to_string(),
                    Json::Num(epub.obfuscated_resources()),
                ),
            ])
        }
        "spine" => {
            let path = first_arg(&rest, "spine requires <epub_path>")?;
            let epub = open(&path)?;
            let package = epub.package().ok_or_else(|| display_err(EpubError::NotOpen))?;
            let items = (0..package.spine_length())
                .map(|index| {
                    let item = package.spine_item(index);
                    Json::Obj(vec![
                        ("index".to_string(), Json::Num(index)),
                        (
                            "idref".to_string(),
                            package
                                .spine_idref(index)
                                .map_or(Json::Null, |v| Json::Str(v.to_string())),
                        ),
                        (
                            "href".to_string(),
                            item.map_or(Json::Null, |i| Json::Str(i.href.to_string())),
                        ),
                        (
                            "media_type".to_string(),
                            item.map_or(Json::Null, |i| Json::Str(i.media_type.to_string())),
                        ),
                    ])
                })
                .collect::<Vec<_>>();
            Json::Obj(vec![
                ("epub".to_string(), Json::Str(path)),
                ("count".to_string(), Json::Num(items.len())),
                ("spine".to_string(), Json::Arr(items)),
            ])
        }
        "toc" => {
            let mut args = rest;
            let save = pop_flag(&mut args, "--save");
            let path = first_arg(&args, "toc requires <epub_path>")?;
            let epub = open(&path)?;
            let store = toc_store_path(&path);

            let mut toc = Toc::default();
            let source = match toc.load(&store) {
                Ok(()) => "store",
                Err(_) => {
                    toc.build_from_navigation(&epub).map_err(display_err)?;
                    "navigation"
                }
            };
            if save {
                toc.save(&store).map_err(display_err)?;
            }
            let entries = toc
                .entries()
                .map(|entry| {
                    Json::Obj(vec![
                        ("label".to_string(), Json::Str(entry.label.to_string())),
                        ("level".to_string(), Json::Num(entry.level as usize)),
                        ("spine_index".to_string(), Json::Num(entry.spine_index)),
                        ("offset".to_string(), Json::Int(i64::from(entry.offset))),
                    ])
                })
                .collect::<Vec<_>>();
            Json::Obj(vec![
                ("epub".to_string(), Json::Str(path)),
                ("source".to_string(), Json::Str(source.to_string())),
                ("saved".to_string(), Json::Bool(toc.is_saved())),
                ("count".to_string(), Json::Num(entries.len())),
                ("toc".to_string(), Json::Arr(entries)),
            ])
        }
        "item" => {
            let path = first_arg(&rest, "item requires <epub_path> <index>")?;
            let index = rest
                .get(1)
                .ok_or_else(|| "item requires <epub_path> <index>".to_string())?
                .parse::<usize>()
                .map_err(|e| format!("invalid index: {}", e))?;
            let mut epub = open(&path)?;
            let item = epub.load(index).map_err(display_err)?;
            let mut fields = item_json(item);
            let fonts = epub
                .with_fonts(|registry| {
                    registry
                        .fonts()
                        .iter()
                        .map(|font| {
                            Json::Obj(vec![
                                ("family".to_string(), Json::Str(font.family.clone())),
                                ("style".to_string(), Json::Str(format!("{:?}", font.style))),
                                ("path".to_string(), Json::Str(font.path.clone())),
                                ("bytes".to_string(), Json::Num(font.data.len())),
                            ])
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            fields.push(("fonts".to_string(), Json::Arr(fonts)));
            fields.push((
                "fonts_too_large".to_string(),
                Json::Bool(epub.fonts_too_large()),
            ));
            Json::Obj(fields)
        }
        other => return Err(format!("unknown command: {}", other)),
    };
    println!("{}", output.render(pretty));
    Ok(())
}

fn open(path: &str) -> Result<Epub, String> {
    let mut epub: Epub = Epub::new(EpubOptions::default());
    epub.open(path).map_err(display_err)?;
    Ok(epub)
}

fn item_json(item: &ContentItem) -> Vec<(String, Json)> {
    let (kind, size) = match item.body() {
        ItemBody::Document(doc) => ("document", doc.buffer_len()),
        ItemBody::Image(data) => ("image", data.len()),
        ItemBody::Empty => ("empty", 0),
    };
    vec![
        ("index".to_string(), Json::Num(item.spine_index())),
        ("path".to_string(), Json::Str(item.path().to_string())),
        (
            "media_type".to_string(),
            item.media_type()
                .map_or(Json::Null, |m| Json::Str(format!("{:?}", m))),
        ),
        ("kind".to_string(), Json::Str(kind.to_string())),
        ("bytes".to_string(), Json::Num(size)),
        (
            "linked_styles".to_string(),
            Json::Num(item.linked_styles().len()),
        ),
        (
            "local_styles".to_string(),
            Json::Num(item.local_styles().len()),
        ),
        ("rules".to_string(), Json::Num(item.style().len())),
    ]
}

fn first_arg(args: &[String], msg: &str) -> Result<String, String> {
    args.first().cloned().ok_or_else(|| msg.to_string())
}

fn pop_flag(args: &mut Vec<String>, flag: &str) -> bool {
    if let Some(pos) = args.iter().position(|a| a == flag) {
        args.remove(pos);
        true
    } else {
        false
    }
}

fn display_err(err: EpubError) -> String {
    err.to_string()
}

fn print_help() {
    let help = r#"ink-epub - inspect EPUB files

USAGE:
  ink-epub [--pretty] <command> [args...]

COMMANDS:
  info <epub_path>
  spine <epub_path>
  toc <epub_path> [--save]
  item <epub_path> <index>

NOTES:
  - Output is JSON.
  - `toc` reads the `.toc` store next to the book when it is valid and
    rebuilds from the navigation document otherwise; `--save` writes it.
"#;
    println!("{}", help);
}

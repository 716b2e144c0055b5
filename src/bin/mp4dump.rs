use anyhow::Context;
use clap::{ArgAction, Parser};
use mp4atom::{
    boxes::{BoxNode, DecodeSource, FourCC},
    known_boxes::KnownBox,
    registry::default_registry,
    schema::Schema,
    util::{hex_dump, read_slice},
    walker::{WalkOptions, Walker},
};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, disable_version_flag = true, about = "MP4/ISOBMFF box walker")]
struct Args {
    /// Input file (standard input when omitted)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Box dictionary driving schema decoding
    #[arg(short, long)]
    schema: Option<PathBuf>,

    /// Use the dictionary bundled with this tool
    #[arg(long, action = ArgAction::SetTrue, conflicts_with = "schema")]
    bundled_schema: bool,

    /// Only print subtree(s) matching a dotted path (e.g. moov.trak[0].mdia.minf.stbl)
    #[arg(long = "filter")]
    filter: Option<String>,

    /// Hex-dump the payload of every box with this tag (file input only)
    #[arg(long = "raw")]
    raw: Option<String>,

    /// Bytes to show when dumping raw (0 means the entire payload)
    #[arg(long, default_value_t = 0)]
    bytes: usize,

    /// Limit recursion depth
    #[arg(long, default_value_t = mp4atom::walker::DEFAULT_MAX_DEPTH)]
    max_depth: usize,

    /// Accept files whose ftyp brand is not on the known list
    #[arg(long, action = ArgAction::SetTrue)]
    no_brand_check: bool,

    /// Emit JSON instead of a human-readable tree
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Print version
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    version: (),
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let schema = if let Some(path) = &args.schema {
        Some(Schema::load(path).with_context(|| format!("loading schema {}", path.display()))?)
    } else if args.bundled_schema {
        Some(Schema::bundled().context("loading bundled schema")?)
    } else {
        None
    };

    let input: Box<dyn Read> = match &args.input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("opening {}", path.display()))?,
        )),
        None => Box::new(io::stdin().lock()),
    };

    let registry = default_registry();
    let options = WalkOptions {
        brand_check: !args.no_brand_check,
        max_depth: args.max_depth,
        ..WalkOptions::default()
    };
    let top = Walker::new(&registry, schema.as_ref(), options)
        .walk_file(input)
        .context("walking input")?;

    let targets: Vec<&BoxNode> = if let Some(path) = &args.filter {
        select_by_path(&top, path)
    } else {
        top.iter().collect()
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&targets)?);
        return Ok(());
    }

    for b in &targets {
        print_box(b, 0);
    }

    if let Some(sel) = args.raw.as_ref() {
        let path = args
            .input
            .as_ref()
            .context("--raw needs a file given with --input")?;
        let tag = FourCC::from_str(sel).with_context(|| format!("'{}' is not a four-character tag", sel))?;
        let mut f = File::open(path)?;
        dump_raw(&mut f, &top, tag, args.bytes)?;
    }

    Ok(())
}

// ---------- Human-readable tree ----------

fn print_box(b: &BoxNode, depth: usize) {
    let indent = "  ".repeat(depth);
    let hdr = &b.header;
    let name = match KnownBox::from(hdr.typ) {
        KnownBox::Unknown(_) => String::new(),
        known => format!(" [{}]", known.full_name()),
    };
    let size = if hdr.size == 0 {
        format!("{}*", b.recomputed_size())
    } else {
        hdr.size.to_string()
    };
    let detail = match (&b.value, b.source) {
        (Some(v), _) => format!(" -> {}", v.summary()),
        (None, DecodeSource::Container | DecodeSource::Schema) => " (container)".to_string(),
        (None, _) => String::new(),
    };
    println!(
        "{indent}{:>6} {:>10} {}{}{}",
        format!("{:#x}", hdr.start),
        size,
        hdr.typ,
        name,
        detail
    );
    for c in &b.children {
        print_box(c, depth + 1);
    }
}

// ---------- Raw dump ----------

fn dump_raw(f: &mut File, boxes: &[BoxNode], tag: FourCC, limit: usize) -> anyhow::Result<()> {
    let mut matches = Vec::new();
    select_boxes(boxes, tag, &mut matches);
    for (i, b) in matches.into_iter().enumerate() {
        let off = b.header.payload_start();
        let len = b.consumed;
        let to_read = if limit == 0 || limit as u64 > len {
            len
        } else {
            limit as u64
        };
        let data = read_slice(f, off, to_read)?;
        println!(
            "\n== Dump {} ({}) payload: offset={:#x}, len={} ==",
            i, b.header.typ, off, to_read
        );
        print!("{}", hex_dump(&data, off));
    }
    Ok(())
}

fn select_boxes<'a>(list: &'a [BoxNode], tag: FourCC, out: &mut Vec<&'a BoxNode>) {
    for b in list {
        if b.header.typ == tag {
            out.push(b);
        }
        select_boxes(&b.children, tag, out);
    }
}

// ---------- Filter path: moov.trak[0].mdia.minf.stbl ----------

fn select_by_path<'a>(roots: &'a [BoxNode], path: &str) -> Vec<&'a BoxNode> {
    let mut current: Vec<&'a BoxNode> = Vec::new();

    for (depth, seg) in path.split('.').enumerate() {
        let (name, idx) = parse_segment(seg);
        let fourcc = FourCC::from_str(name).unwrap_or(FourCC(*b"????"));
        let candidates: Vec<&'a [BoxNode]> = if depth == 0 {
            vec![roots]
        } else {
            current.iter().map(|b| b.children.as_slice()).collect()
        };

        let mut next = Vec::new();
        for list in candidates {
            let matches: Vec<&BoxNode> = list.iter().filter(|c| c.header.typ == fourcc).collect();
            match idx {
                Some(i) => next.extend(matches.get(i).copied()),
                None => next.extend(matches),
            }
        }

        current = next;
        if current.is_empty() {
            break;
        }
    }

    current
}

fn parse_segment(seg: &str) -> (&str, Option<usize>) {
    if let Some(l) = seg.find('[') {
        let name = &seg[..l];
        if let Some(r) = seg[l + 1..].find(']') {
            let idx_str = &seg[l + 1..l + 1 + r];
            let idx = idx_str.parse::<usize>().ok();
            return (name, idx);
        }
        (name, None)
    } else {
        (seg, None)
    }
}

use anyhow::{Context, Result};
use clap::Parser;
use markscraper::{
    archive,
    table::{TableHeader, TableReader},
};
use std::{
    io::{Cursor, Read, Seek},
    path::PathBuf,
};

/// Print the header, field layout and first rows of a table file, either
/// standalone or straight out of a downloaded archive.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// A `.dbf` file, or a `.zip` containing one.
    path: PathBuf,

    /// Member suffix to look for when `path` is an archive.
    #[arg(long, default_value = ".dbf")]
    suffix: String,

    /// Number of rows to print.
    #[arg(short = 'n', long, default_value_t = 5)]
    rows: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let is_archive = args
        .path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"));

    if is_archive {
        let member = archive::read_member(&args.path, &args.suffix)
            .with_context(|| format!("reading {}", args.path.display()))?;
        println!("=== Archive: {} ===", args.path.display());
        println!("Member:               {}", member.name);
        for ignored in &member.ignored {
            println!("Ignored duplicate:    {}", ignored);
        }
        let reader = TableReader::new(Cursor::new(member.bytes)).context("decoding header")?;
        inspect(reader, args.rows)
    } else {
        let reader = TableReader::open(&args.path)
            .with_context(|| format!("decoding header of {}", args.path.display()))?;
        println!("=== Table: {} ===", args.path.display());
        inspect(reader, args.rows)
    }
}

fn inspect<R: Read + Seek>(reader: TableReader<R>, limit: usize) -> Result<()> {
    let header = *reader.header();
    println!("Version byte:         0x{:02X}", header.version);
    println!(
        "Last update:          {}",
        header
            .last_update
            .map_or_else(|| "<invalid>".to_string(), |d| d.to_string())
    );
    println!("Records (declared):   {}", header.record_count);
    println!("Header length:        {}", header.header_length);
    println!("Record length:        {}", header.record_length);
    let computed = TableHeader::expected_record_length(reader.fields());
    println!(
        "Layout check:         {} (fields + flag = {})",
        if header.layout_matches(reader.fields()) { "ok" } else { "MISMATCH" },
        computed
    );
    println!();

    println!("=== Fields ===");
    let mut offset = 1usize;
    for field in reader.fields() {
        println!(
            "- {:<11} | {} | len {:>3} | dec {:>2} | offset {:>4}",
            field.name,
            field.field_type.code(),
            field.length,
            field.decimal_count,
            offset
        );
        offset += field.length as usize;
    }
    println!();

    println!("=== First {} row(s) ===", limit);
    let mut records = reader.records();
    for row in records.by_ref().take(limit) {
        let row = row.context("reading records")?;
        let cells: Vec<String> = row
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        println!("{}", cells.join(" | "));
    }
    if records.deleted() > 0 {
        println!("({} deleted record(s) skipped)", records.deleted());
    }
    Ok(())
}

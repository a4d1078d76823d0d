//! protodyn - Encode, decode and verify Protocol Buffers messages
//!
//! This tool loads JSON schema descriptors (or a compiled
//! `FileDescriptorSet`) at run time and converts messages between their
//! JSON form and the binary wire format.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use protodyn_core::{
    BytesFormat, ConversionOptions, EnumFormat, FsFetch, Loader, LongFormat, Reader, Root,
    StatsVisitor, TypeRef,
};
use serde_json::Value as JsonValue;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn, Level};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// Encode, decode and verify Protocol Buffers messages against run-time schemas
#[derive(Parser, Debug)]
#[command(name = "protodyn")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encode a JSON message to the binary wire format
    Encode(EncodeArgs),
    /// Decode binary messages to JSON
    Decode(DecodeArgs),
    /// Check a JSON message against its type and report the first problem
    Verify(VerifyArgs),
    /// Show statistics and the type list of a schema
    Inspect(InspectArgs),
}

#[derive(Args, Debug)]
struct SchemaArgs {
    /// JSON schema descriptor to load (repeatable)
    #[arg(short, long = "schema")]
    schemas: Vec<PathBuf>,

    /// Directory searched recursively for *.json schema descriptors
    #[arg(long)]
    schema_dir: Option<PathBuf>,

    /// Compiled FileDescriptorSet to load
    #[arg(long)]
    descriptor_set: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct EncodeArgs {
    #[command(flatten)]
    schema: SchemaArgs,

    /// Fully qualified message type, e.g. pkg.Message
    #[arg(short = 't', long = "type")]
    type_name: String,

    /// JSON input file (stdin when omitted)
    input: Option<PathBuf>,

    /// Output file (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Length-prefix every message; the input may then be a JSON array
    #[arg(long)]
    delimited: bool,
}

#[derive(Args, Debug)]
struct DecodeArgs {
    #[command(flatten)]
    schema: SchemaArgs,

    /// Fully qualified message type, e.g. pkg.Message
    #[arg(short = 't', long = "type")]
    type_name: String,

    /// Binary input file (stdin when omitted)
    input: Option<PathBuf>,

    /// Output file (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Read a stream of length-prefixed messages and print a JSON array
    #[arg(long)]
    delimited: bool,

    #[command(flatten)]
    conversion: ConversionArgs,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,
}

#[derive(Args, Debug)]
struct VerifyArgs {
    #[command(flatten)]
    schema: SchemaArgs,

    /// Fully qualified message type, e.g. pkg.Message
    #[arg(short = 't', long = "type")]
    type_name: String,

    /// JSON input file (stdin when omitted)
    input: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct InspectArgs {
    #[command(flatten)]
    schema: SchemaArgs,

    /// Only print the list of message types
    #[arg(long)]
    types_only: bool,
}

#[derive(Args, Debug)]
struct ConversionArgs {
    /// How 64-bit integers are written
    #[arg(long, value_enum, default_value = "string")]
    longs: LongsArg,

    /// How enum values are written
    #[arg(long, value_enum, default_value = "number")]
    enums: EnumsArg,

    /// How bytes fields are written
    #[arg(long, value_enum, default_value = "base64")]
    bytes: BytesArg,

    /// Include fields that are not set, with their default values
    #[arg(long)]
    defaults: bool,

    /// Name the populated member of each oneof
    #[arg(long)]
    oneofs: bool,
}

/// Output representation of 64-bit integers
#[derive(Debug, Clone, Copy, ValueEnum)]
enum LongsArg {
    /// Plain JSON numbers
    Number,
    /// Decimal strings
    String,
    /// Objects with low and high halves
    Object,
}

/// Output representation of enum values
#[derive(Debug, Clone, Copy, ValueEnum)]
enum EnumsArg {
    /// Numeric values
    Number,
    /// Value names
    Name,
}

/// Output representation of bytes fields
#[derive(Debug, Clone, Copy, ValueEnum)]
enum BytesArg {
    /// Base64 strings
    Base64,
    /// Arrays of octets
    Array,
}

impl From<LongsArg> for LongFormat {
    fn from(arg: LongsArg) -> Self {
        match arg {
            LongsArg::Number => LongFormat::Number,
            LongsArg::String => LongFormat::String,
            LongsArg::Object => LongFormat::Object,
        }
    }
}

impl From<EnumsArg> for EnumFormat {
    fn from(arg: EnumsArg) -> Self {
        match arg {
            EnumsArg::Number => EnumFormat::Number,
            EnumsArg::Name => EnumFormat::Name,
        }
    }
}

impl From<BytesArg> for BytesFormat {
    fn from(arg: BytesArg) -> Self {
        match arg {
            BytesArg::Base64 => BytesFormat::Base64,
            BytesArg::Array => BytesFormat::Array,
        }
    }
}

impl ConversionArgs {
    fn options(&self) -> ConversionOptions {
        ConversionOptions::new()
            .longs(self.longs.into())
            .enums(self.enums.into())
            .bytes(self.bytes.into())
            .defaults(self.defaults)
            .oneofs(self.oneofs)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    match &cli.command {
        Command::Encode(args) => run_encode(args),
        Command::Decode(args) => run_decode(args),
        Command::Verify(args) => run_verify(args),
        Command::Inspect(args) => run_inspect(args),
    }
}

/// Load every schema source named on the command line into one resolved tree
fn load_schema(args: &SchemaArgs) -> Result<Root> {
    let mut root = match &args.descriptor_set {
        Some(path) => {
            let data = fs::read(path)
                .with_context(|| format!("Failed to read descriptor set: {}", path.display()))?;
            Root::from_descriptor_set_bytes(&data)
                .with_context(|| format!("Failed to import descriptor set: {}", path.display()))?
        }
        None => Root::new(),
    };

    let mut names = Vec::new();
    for path in &args.schemas {
        let absolute = fs::canonicalize(path)
            .with_context(|| format!("Schema file does not exist: {}", path.display()))?;
        names.push(absolute.to_string_lossy().into_owned());
    }
    if let Some(dir) = &args.schema_dir {
        names.extend(collect_schema_files(dir)?);
    }

    if names.is_empty() && args.descriptor_set.is_none() {
        bail!("No schema given (use --schema, --schema-dir or --descriptor-set)");
    }

    let fetch = FsFetch::new(args.schema_dir.iter().cloned());
    let mut loader = Loader::new(fetch);
    let names: Vec<&str> = names.iter().map(String::as_str).collect();
    loader
        .load(&mut root, &names)
        .context("Failed to load schema files")?;
    debug!("Loaded {} schema file(s)", loader.loaded().count());

    root.resolve_all().context("Failed to resolve schema")?;
    info!("Schema ready with {} nodes", root.len());
    Ok(root)
}

/// Names of the `*.json` files below `dir`, relative to it and sorted
fn collect_schema_files(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        bail!("Schema directory does not exist: {}", dir.display());
    }

    let mut names = Vec::new();
    for entry in WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() || !is_schema_file(path) {
            continue;
        }
        match path.strip_prefix(dir) {
            Ok(relative) => {
                trace!("Found schema: {}", path.display());
                names.push(relative.to_string_lossy().into_owned());
            }
            Err(_) => warn!("Skipping schema outside {}: {}", dir.display(), path.display()),
        }
    }
    names.sort();
    Ok(names)
}

/// Whether `path` looks like a JSON schema descriptor
fn is_schema_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(true);
    let json = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    !hidden && json
}

fn lookup<'r>(root: &'r Root, type_name: &str) -> Result<TypeRef<'r>> {
    root.get_type(type_name.trim_start_matches('.'))
        .with_context(|| format!("Unknown message type: {}", type_name))
}

fn read_input(input: Option<&Path>) -> Result<Vec<u8>> {
    match input {
        Some(path) => {
            fs::read(path).with_context(|| format!("Failed to read input file: {}", path.display()))
        }
        None => {
            let mut data = Vec::new();
            io::stdin()
                .read_to_end(&mut data)
                .context("Failed to read standard input")?;
            Ok(data)
        }
    }
}

fn read_json(input: Option<&Path>) -> Result<JsonValue> {
    let data = read_input(input)?;
    serde_json::from_slice(&data).context("Input is not valid JSON")
}

fn write_output(output: Option<&Path>, data: &[u8]) -> Result<()> {
    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create directory: {}", parent.display())
                    })?;
                }
            }
            fs::write(path, data)
                .with_context(|| format!("Failed to write file: {}", path.display()))
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(data).context("Failed to write output")?;
            stdout.flush().context("Failed to write output")
        }
    }
}

fn run_encode(args: &EncodeArgs) -> Result<()> {
    let root = load_schema(&args.schema)?;
    let ty = lookup(&root, &args.type_name)?;
    let json = read_json(args.input.as_deref())?;
    let data = encode_json(ty, &json, args.delimited)?;
    info!("Encoded {} bytes of {}", data.len(), ty.full_name());
    write_output(args.output.as_deref(), &data)
}

/// Encode one JSON message, or with `delimited` a message or array of
/// messages as a length-prefixed stream
fn encode_json(ty: TypeRef<'_>, json: &JsonValue, delimited: bool) -> Result<Vec<u8>> {
    let objects: Vec<&JsonValue> = match json {
        JsonValue::Array(items) if delimited => items.iter().collect(),
        _ => vec![json],
    };

    let mut data = Vec::new();
    for (i, object) in objects.iter().enumerate() {
        if let Some(problem) = ty.verify(object) {
            bail!("Message {} is not a valid {}: {}", i, ty.full_name(), problem);
        }
        let message = ty
            .from_object(object)
            .with_context(|| format!("Failed to convert message {}", i))?;
        let bytes = if delimited {
            ty.encode_delimited(&message)
        } else {
            ty.encode(&message)
        }
        .with_context(|| format!("Failed to encode message {}", i))?;
        data.extend_from_slice(&bytes);
    }
    Ok(data)
}

fn run_decode(args: &DecodeArgs) -> Result<()> {
    let root = load_schema(&args.schema)?;
    let ty = lookup(&root, &args.type_name)?;
    let data = read_input(args.input.as_deref())?;
    let json = decode_bytes(ty, data, args.delimited, &args.conversion.options())?;

    let mut text = if args.pretty {
        serde_json::to_string_pretty(&json)?
    } else {
        serde_json::to_string(&json)?
    };
    text.push('\n');
    write_output(args.output.as_deref(), text.as_bytes())
}

/// Decode one message, or with `delimited` every length-prefixed message
/// of the buffer into a JSON array
fn decode_bytes(
    ty: TypeRef<'_>,
    data: Vec<u8>,
    delimited: bool,
    options: &ConversionOptions,
) -> Result<JsonValue> {
    if !delimited {
        let message = ty
            .decode(data)
            .with_context(|| format!("Failed to decode {}", ty.full_name()))?;
        return Ok(ty.to_object(&message, options)?);
    }

    let mut reader = Reader::new(data);
    let mut objects = Vec::new();
    while !reader.is_at_end() {
        let offset = reader.pos();
        let message = ty.decode_delimited(&mut reader).with_context(|| {
            format!("Failed to decode {} at offset {}", ty.full_name(), offset)
        })?;
        objects.push(ty.to_object(&message, options)?);
    }
    debug!("Decoded {} delimited message(s)", objects.len());
    Ok(JsonValue::Array(objects))
}

fn run_verify(args: &VerifyArgs) -> Result<()> {
    let root = load_schema(&args.schema)?;
    let ty = lookup(&root, &args.type_name)?;
    let json = read_json(args.input.as_deref())?;
    match ty.verify(&json) {
        None => {
            println!("ok");
            Ok(())
        }
        Some(problem) => bail!("{}: {}", ty.full_name(), problem),
    }
}

fn run_inspect(args: &InspectArgs) -> Result<()> {
    let root = load_schema(&args.schema)?;
    let types = type_names(&root);
    if !args.types_only {
        let mut stats = StatsVisitor::default();
        root.visit(&mut stats);
        println!("namespaces: {}", stats.namespace_count);
        println!("types:      {}", stats.type_count);
        println!("fields:     {}", stats.field_count);
        println!("enums:      {}", stats.enum_count);
        println!("services:   {}", stats.service_count);
        println!("methods:    {}", stats.method_count);
        println!("---");
    }
    for name in types {
        println!("{}", name);
    }
    Ok(())
}

/// Full names of every message type, sorted and without the leading dot
fn type_names(root: &Root) -> Vec<String> {
    let mut names: Vec<String> = root
        .ids()
        .filter(|&id| root.as_type(id).is_some())
        .map(|id| root.full_name(id).trim_start_matches('.').to_string())
        .collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn schema_json() -> JsonValue {
        json!({
            "nested": { "demo": { "nested": {
                "Item": { "fields": {
                    "id": { "type": "int64", "id": 1 },
                    "name": { "type": "string", "id": 2 },
                    "kind": { "type": "Kind", "id": 3 }
                } },
                "Kind": { "values": { "PLAIN": 0, "SPECIAL": 1 } }
            } } }
        })
    }

    fn write_schema(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, schema_json().to_string()).unwrap();
        path
    }

    fn schema_args(schemas: Vec<PathBuf>, schema_dir: Option<PathBuf>) -> SchemaArgs {
        SchemaArgs {
            schemas,
            schema_dir,
            descriptor_set: None,
        }
    }

    #[test]
    fn test_load_schema_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_schema(temp_dir.path(), "demo.json");

        let root = load_schema(&schema_args(vec![path], None)).unwrap();
        assert!(root.is_resolved());
        assert_eq!(type_names(&root), vec!["demo.Item"]);
    }

    #[test]
    fn test_load_schema_from_directory() {
        let temp_dir = TempDir::new().unwrap();
        write_schema(temp_dir.path(), "nested/demo.json");
        fs::write(temp_dir.path().join("notes.txt"), "not a schema").unwrap();
        fs::write(temp_dir.path().join(".hidden.json"), "{").unwrap();

        let names = collect_schema_files(temp_dir.path()).unwrap();
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with("demo.json"));

        let root =
            load_schema(&schema_args(Vec::new(), Some(temp_dir.path().to_path_buf()))).unwrap();
        assert!(lookup(&root, ".demo.Item").is_ok());
    }

    #[test]
    fn test_load_schema_requires_a_source() {
        assert!(load_schema(&schema_args(Vec::new(), None)).is_err());
        assert!(load_schema(&schema_args(vec![PathBuf::from("/nonexistent.json")], None)).is_err());
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let root = Root::from_json(&schema_json()).unwrap();
        let ty = lookup(&root, "demo.Item").unwrap();
        let input = json!({ "id": "42", "name": "widget", "kind": "SPECIAL" });

        let data = encode_json(ty, &input, false).unwrap();
        assert_eq!(&data[..2], &[0x08u8, 42][..]);

        let options = ConversionArgs {
            longs: LongsArg::String,
            enums: EnumsArg::Name,
            bytes: BytesArg::Base64,
            defaults: false,
            oneofs: false,
        }
        .options();
        let output = decode_bytes(ty, data, false, &options).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn test_delimited_stream() {
        let root = Root::from_json(&schema_json()).unwrap();
        let ty = lookup(&root, "demo.Item").unwrap();
        let input = json!([{ "name": "a" }, { "name": "b" }]);

        let data = encode_json(ty, &input, true).unwrap();
        assert_eq!(data, vec![3, 0x12, 1, b'a', 3, 0x12, 1, b'b']);

        let output = decode_bytes(ty, data, true, &ConversionOptions::new()).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn test_encode_rejects_invalid_message() {
        let root = Root::from_json(&schema_json()).unwrap();
        let ty = lookup(&root, "demo.Item").unwrap();
        let err = encode_json(ty, &json!({ "name": 7 }), false).unwrap_err();
        assert!(err.to_string().contains("name: string expected"));
    }

    #[test]
    fn test_unknown_type() {
        let root = Root::from_json(&schema_json()).unwrap();
        assert!(lookup(&root, "demo.Missing").is_err());
    }

    #[test]
    fn test_is_schema_file() {
        assert!(is_schema_file(Path::new("/tmp/a.json")));
        assert!(is_schema_file(Path::new("/tmp/B.JSON")));
        assert!(!is_schema_file(Path::new("/tmp/.a.json")));
        assert!(!is_schema_file(Path::new("/tmp/a.proto")));
    }

    #[test]
    fn test_write_output_creates_directories() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("out/msg.bin");
        write_output(Some(&path), &[1, 2, 3]).unwrap();
        assert_eq!(fs::read(&path).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}

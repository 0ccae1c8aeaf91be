//! tbdgen - Convert Mach-O libraries and dyld shared cache images to .tbd files.

use std::fs;
use std::io::{self, BufWriter, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{error, warn, Level};
use tracing_subscriber::FmtSubscriber;

use tbdgen::{
    arch, convert_dsc_image, dyld::{ImageFilter, Selection}, merge_facts, parse_facts, tbd,
    write_tbd, ArchSet, DscContext, Error, Options, Platform, Source, Stub, TbdFlags, TbdVersion,
};

/// Convert Mach-O dynamic libraries and dyld shared cache images to .tbd files.
#[derive(Parser, Debug)]
#[command(name = "tbdgen")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level (0=quiet, 1=warnings, 2=info, 3=debug)
    #[arg(long, global = true, default_value = "1")]
    verbosity: u8,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Convert Mach-O library files to tbd
    Convert {
        /// Input files, or directories when recursing
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Output file (single input) or directory; "stdout" or omitted
        /// prints to standard output
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Recurse into directories ("once" stays at the top level)
        #[arg(short, long, value_enum, num_args = 0..=1, require_equals = true, default_missing_value = "all")]
        recurse: Option<RecurseMode>,

        /// Mirror each input's directory structure under the output
        /// directory (only with --recurse)
        #[arg(long)]
        maintain_directories: bool,

        #[command(flatten)]
        conversion: ConversionArgs,

        /// Suppress warnings
        #[arg(long)]
        dont_print_warnings: bool,
    },

    /// Convert images of a dyld shared cache to tbd
    Dsc {
        /// Path to the shared cache file
        cache: PathBuf,

        /// Output directory; omitted prints every selected image to
        /// standard output
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Select images whose path contains this directory component
        #[arg(long = "filter-dir")]
        filter_dirs: Vec<String>,

        /// Select images with this leaf filename
        #[arg(long = "filter-name")]
        filter_names: Vec<String>,

        /// Select an image by exact path
        #[arg(long = "image")]
        images: Vec<String>,

        /// Select an image by its 1-based number in the cache
        #[arg(long = "image-number")]
        image_numbers: Vec<u64>,

        /// Number of parallel jobs (default: number of CPUs)
        #[arg(short, long)]
        jobs: Option<usize>,

        #[command(flatten)]
        conversion: ConversionArgs,

        /// Suppress warnings
        #[arg(long)]
        dont_print_warnings: bool,
    },

    /// List supported values and cache contents
    List {
        #[command(subcommand)]
        what: ListCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ListCommands {
    /// List the architectures the registry knows
    Archs,
    /// List the platforms tbd files accept
    Platforms,
    /// List the tbd dialect names
    Versions,
    /// List the objc constraint names
    ObjcConstraints,
    /// List the tbd flag names
    Flags,
    /// List the images of a shared cache
    Images {
        /// Path to the shared cache file
        cache: PathBuf,
    },
    /// List the Mach-O libraries under a directory
    Libraries {
        /// Directory to search
        dir: PathBuf,

        /// Recurse into subdirectories
        #[arg(short, long, value_enum, num_args = 0..=1, require_equals = true, default_missing_value = "all")]
        recurse: Option<RecurseMode>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum RecurseMode {
    /// Only the directory itself
    Once,
    /// The whole tree
    All,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum VersionArg {
    V1,
    V2,
    V3,
}

impl From<VersionArg> for TbdVersion {
    fn from(value: VersionArg) -> Self {
        match value {
            VersionArg::V1 => TbdVersion::V1,
            VersionArg::V2 => TbdVersion::V2,
            VersionArg::V3 => TbdVersion::V3,
        }
    }
}

/// Conversion options shared by `convert` and `dsc`.
#[derive(Args, Clone, Debug)]
struct ConversionArgs {
    /// The tbd dialect to write
    #[arg(short = 'v', long = "version", value_enum, default_value = "v2")]
    version: VersionArg,

    /// Only parse these architectures out of the input
    #[arg(short = 'a', long = "arch")]
    archs: Vec<String>,

    /// Replace the architecture list written to the output
    #[arg(long = "archs")]
    archs_override: Vec<String>,

    /// Platform to write, overriding what the binary records
    #[arg(long)]
    platform: Option<String>,

    /// Extra tbd flag to set (flat_namespace, not_app_extension_safe)
    #[arg(long = "flag")]
    flags: Vec<String>,

    /// Keep private symbols of every classification
    #[arg(long)]
    allow_all_private_symbols: bool,

    /// Keep private plain and thread-local symbols
    #[arg(long)]
    allow_private_normal_symbols: bool,

    /// Keep private weakly-defined symbols
    #[arg(long)]
    allow_private_weak_symbols: bool,

    /// Keep private objc class, exception type and ivar symbols
    #[arg(long)]
    allow_private_objc_symbols: bool,

    /// Keep private objc class symbols
    #[arg(long)]
    allow_private_objc_classes: bool,

    /// Keep private objc exception type symbols
    #[arg(long)]
    allow_private_objc_ehtypes: bool,

    /// Keep private objc instance variable symbols
    #[arg(long)]
    allow_private_objc_ivars: bool,
}

impl ConversionArgs {
    fn to_options(&self) -> Result<Options> {
        let mut options = Options {
            version: self.version.into(),
            ..Default::default()
        };

        if !self.archs.is_empty() {
            options.archs = Some(parse_arch_list(&self.archs)?);
        }
        if !self.archs_override.is_empty() {
            options.archs_override = Some(parse_arch_list(&self.archs_override)?);
        }

        if let Some(name) = &self.platform {
            options.platform = Some(
                Platform::from_name(name)
                    .with_context(|| format!("unrecognized platform '{name}'"))?,
            );
        }

        for name in &self.flags {
            options.flags |= TbdFlags::from_flag_name(name)
                .with_context(|| format!("unrecognized tbd flag '{name}'"))?;
        }

        let all = self.allow_all_private_symbols;
        let all_objc = all || self.allow_private_objc_symbols;
        options.allow_private_normal_symbols = self.allow_private_normal_symbols || all;
        options.allow_private_weak_symbols = self.allow_private_weak_symbols || all;
        options.allow_private_objc_classes = self.allow_private_objc_classes || all_objc;
        options.allow_private_objc_ehtypes = self.allow_private_objc_ehtypes || all_objc;
        options.allow_private_objc_ivars = self.allow_private_objc_ivars || all_objc;

        Ok(options)
    }
}

fn parse_arch_list(names: &[String]) -> Result<ArchSet> {
    let mut set = ArchSet::EMPTY;
    for name in names {
        let index = arch::arch_from_name(name)
            .with_context(|| format!("unrecognized architecture '{name}'"))?;
        set.insert(index);
    }
    Ok(set)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbosity);

    let failures = match cli.command {
        Commands::Convert {
            paths,
            output,
            recurse,
            maintain_directories,
            conversion,
            dont_print_warnings,
        } => cmd_convert(
            paths,
            output,
            recurse,
            maintain_directories,
            &conversion.to_options()?,
            dont_print_warnings,
        )?,
        Commands::Dsc {
            cache,
            output,
            filter_dirs,
            filter_names,
            images,
            image_numbers,
            jobs,
            conversion,
            dont_print_warnings,
        } => {
            let selection = Selection {
                filters: filter_dirs
                    .into_iter()
                    .map(ImageFilter::directory)
                    .chain(filter_names.into_iter().map(ImageFilter::filename))
                    .chain(images.into_iter().map(ImageFilter::path))
                    .collect(),
                numbers: image_numbers,
            };
            cmd_dsc(
                &cache,
                output,
                selection,
                jobs,
                &conversion.to_options()?,
                dont_print_warnings,
            )?
        }
        Commands::List { what } => {
            cmd_list(what)?;
            0
        }
    };

    if failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        _ => Level::DEBUG,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .with_writer(io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).ok();
}

// =============================================================================
// Convert
// =============================================================================

fn cmd_convert(
    paths: Vec<PathBuf>,
    output: Option<PathBuf>,
    recurse: Option<RecurseMode>,
    maintain_directories: bool,
    options: &Options,
    dont_print_warnings: bool,
) -> Result<usize> {
    if maintain_directories && recurse.is_none() {
        bail!("--maintain-directories is only valid together with --recurse");
    }

    // Expand directories into the library files they contain.
    let mut inputs: Vec<(PathBuf, PathBuf)> = Vec::new(); // (file, root it came from)
    for path in &paths {
        if path.is_dir() {
            let Some(mode) = recurse else {
                bail!(
                    "'{}' is a directory; pass --recurse to convert its contents",
                    path.display()
                );
            };
            let files = collect_macho_files(path, mode == RecurseMode::All)?;
            if files.is_empty() && !dont_print_warnings {
                warn!("no mach-o libraries found under '{}'", path.display());
            }
            inputs.extend(files.into_iter().map(|f| (f, path.clone())));
        } else {
            inputs.push((path.clone(), PathBuf::new()));
        }
    }

    // `None` here means standard output.
    let out_path = output.filter(|path| path.as_os_str() != "stdout");
    if let Some(dir) = &out_path {
        if inputs.len() > 1 {
            fs::create_dir_all(dir).with_context(|| {
                format!("failed to create output directory '{}'", dir.display())
            })?;
        }
    }

    let mut failures = 0usize;
    for (file, root) in &inputs {
        let result = convert_file(file, options).and_then(|stub| match &out_path {
            None => write_stub_stdout(&stub, options.version),
            Some(path) if inputs.len() == 1 => {
                write_stub_file(&stub, options.version, path, false)
            }
            Some(dir) => {
                let target = derived_output_path(dir, file, root, maintain_directories);
                write_stub_file(&stub, options.version, &target, true)
            }
        });

        if let Err(err) = result {
            error!("{}: {}", file.display(), err);
            failures += 1;
        }
    }

    Ok(failures)
}

/// Parses and merges one file, prompting for a platform when the merge
/// fails recoverably on an interactive terminal. The retry re-runs only the
/// merge; the file is not read again.
fn convert_file(path: &Path, options: &Options) -> tbdgen::Result<Stub> {
    let source = Source::open(path)?;
    let facts = parse_facts(&source, options)?;

    match merge_facts(&facts, options) {
        Err(err) if err.is_recoverable() && options.platform.is_none() => {
            match prompt_for_platform(path, &err) {
                Some(platform) => merge_facts(
                    &facts,
                    &Options {
                        platform: Some(platform),
                        ..options.clone()
                    },
                ),
                None => Err(err),
            }
        }
        result => result,
    }
}

fn prompt_for_platform(path: &Path, err: &Error) -> Option<Platform> {
    if !io::stdin().is_terminal() {
        return None;
    }

    eprintln!("{}: {}", path.display(), err);
    loop {
        eprint!("Please provide a platform ('list' shows the options): ");
        io::stderr().flush().ok();

        let mut line = String::new();
        if io::stdin().read_line(&mut line).is_err() || line.is_empty() {
            return None;
        }
        let name = line.trim();
        if name.is_empty() {
            return None;
        }
        if name == "list" {
            for platform in Platform::names() {
                eprintln!("  {platform}");
            }
            continue;
        }
        match Platform::from_name(name) {
            Some(platform) => return Some(platform),
            None => eprintln!("Unrecognized platform '{name}'"),
        }
    }
}

/// Walks a directory for files whose leading bytes classify as a thin or
/// fat Mach-O.
fn collect_macho_files(dir: &Path, all_levels: bool) -> Result<Vec<PathBuf>> {
    fn walk(dir: &Path, all_levels: bool, out: &mut Vec<PathBuf>) -> Result<()> {
        for entry in fs::read_dir(dir)
            .with_context(|| format!("failed to read directory '{}'", dir.display()))?
        {
            let path = entry?.path();
            if path.is_dir() {
                if all_levels {
                    walk(&path, all_levels, out)?;
                }
            } else if is_macho_file(&path) {
                out.push(path);
            }
        }
        Ok(())
    }

    let mut files = Vec::new();
    walk(dir, all_levels, &mut files)?;
    files.sort();
    Ok(files)
}

fn is_macho_file(path: &Path) -> bool {
    let Ok(source) = Source::open(path) else {
        return false;
    };
    let len = source.len().min(16) as usize;
    let Ok(prefix) = source.read_at(0, len) else {
        return false;
    };
    matches!(
        tbdgen::macho::classify(prefix),
        tbdgen::Container::Thin { .. } | tbdgen::Container::Fat { .. }
    )
}

fn derived_output_path(
    out_dir: &Path,
    file: &Path,
    root: &Path,
    maintain_directories: bool,
) -> PathBuf {
    let relative: PathBuf = if maintain_directories && !root.as_os_str().is_empty() {
        file.strip_prefix(root).unwrap_or(file).to_path_buf()
    } else {
        PathBuf::from(file.file_name().unwrap_or(file.as_os_str()))
    };

    let mut target = out_dir.join(relative);
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.set_file_name(format!("{name}.tbd"));
    target
}

// =============================================================================
// Output
// =============================================================================

fn write_stub_stdout(stub: &Stub, version: TbdVersion) -> tbdgen::Result<()> {
    let stdout = io::stdout();
    let mut lock = stdout.lock();
    write_tbd(&mut lock, stub, version).map_err(|e| Error::WriteFailed {
        target: "stdout".to_string(),
        source: e,
    })
}

/// Writes one stub to a file. Derived paths (recursion, cache batches)
/// refuse to clobber an existing file; an explicitly named target is
/// truncated.
fn write_stub_file(
    stub: &Stub,
    version: TbdVersion,
    path: &Path,
    derived: bool,
) -> tbdgen::Result<()> {
    if derived && path.exists() {
        return Err(Error::AlreadyExists {
            path: path.to_path_buf(),
        });
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| Error::WriteFailed {
                target: parent.display().to_string(),
                source: e,
            })?;
        }
    }

    let failed = |e: io::Error| Error::WriteFailed {
        target: path.display().to_string(),
        source: e,
    };

    let file = fs::File::create(path).map_err(failed)?;
    let mut writer = BufWriter::new(file);
    write_tbd(&mut writer, stub, version).map_err(failed)?;
    writer.flush().map_err(failed)
}

// =============================================================================
// Shared Cache
// =============================================================================

fn cmd_dsc(
    cache: &Path,
    output: Option<PathBuf>,
    mut selection: Selection,
    jobs: Option<usize>,
    options: &Options,
    dont_print_warnings: bool,
) -> Result<usize> {
    let ctx = DscContext::open(cache)
        .with_context(|| format!("failed to open shared cache '{}'", cache.display()))?;

    let (selected, out_of_range) = selection.select(ctx.images());

    if !dont_print_warnings {
        for number in out_of_range {
            warn!(
                "image number {} is out of range (cache holds {} images)",
                number,
                ctx.image_count()
            );
        }
        for filter in selection.unmatched() {
            warn!("filter '{}' matched no image", filter.value);
        }
    }

    if selected.is_empty() {
        if !dont_print_warnings {
            warn!("no images selected from '{}'", cache.display());
        }
        return Ok(0);
    }

    let Some(out_dir) = output else {
        // Sequential to stdout; documents appear in image-table order.
        let mut failures = 0;
        for &index in &selected {
            let image = &ctx.images()[index];
            let result = convert_dsc_image(&ctx, image, options)
                .and_then(|stub| write_stub_stdout(&stub, options.version));
            if let Err(err) = result {
                error!("{}: {}", image.path, err);
                failures += 1;
            }
        }
        return Ok(failures);
    };

    fs::create_dir_all(&out_dir)
        .with_context(|| format!("failed to create output directory '{}'", out_dir.display()))?;

    if let Some(n) = jobs {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build_global()
            .ok();
    }

    let progress = if selected.len() > 1 {
        let bar = ProgressBar::new(selected.len() as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
                .unwrap()
                .progress_chars("#>-"),
        );
        Some(bar)
    } else {
        None
    };

    let failures = AtomicUsize::new(0);
    selected.par_iter().for_each(|&index| {
        let image = &ctx.images()[index];
        let target = out_dir.join(format!("{}.tbd", image.path.trim_start_matches('/')));

        let result = convert_dsc_image(&ctx, image, options)
            .and_then(|stub| write_stub_file(&stub, options.version, &target, true));

        if let Some(bar) = &progress {
            bar.inc(1);
        }
        if let Err(err) = result {
            error!("{}: {}", image.path, err);
            failures.fetch_add(1, Ordering::Relaxed);
        }
    });

    if let Some(bar) = progress {
        bar.finish_and_clear();
    }

    Ok(failures.into_inner())
}

// =============================================================================
// Lists
// =============================================================================

fn cmd_list(what: ListCommands) -> Result<()> {
    match what {
        ListCommands::Archs => {
            for info in arch::ARCH_INFOS {
                println!("{}", info.name);
            }
        }
        ListCommands::Platforms => {
            for name in Platform::names() {
                println!("{name}");
            }
        }
        ListCommands::Versions => {
            for name in TbdVersion::names() {
                println!("{name}");
            }
        }
        ListCommands::ObjcConstraints => {
            for name in tbd::ObjcConstraint::names() {
                println!("{name}");
            }
        }
        ListCommands::Flags => {
            for name in TbdFlags::all_names() {
                println!("{name}");
            }
        }
        ListCommands::Images { cache } => {
            let ctx = DscContext::open(&cache)
                .with_context(|| format!("failed to open shared cache '{}'", cache.display()))?;
            for image in ctx.images() {
                println!("{}", image.path);
            }
        }
        ListCommands::Libraries { dir, recurse } => {
            // Like `convert`, recursion below the top level is opt-in.
            let all = recurse == Some(RecurseMode::All);
            for path in collect_macho_files(&dir, all)? {
                println!("{}", path.display());
            }
        }
    }
    Ok(())
}

use anyhow::{bail, Context, Result};
use clap::Parser;
use dragon_compiler::resolver::{ImportLoader, NoImports};
use dragon_diagnostics::IntoDiagnostic;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Parser)]
#[command(name = "dragon")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compiles .drgn sources to C and, optionally, runs them")]
struct Cli {
    /// The .drgn file to compile
    file: PathBuf,

    /// Compile and immediately run the resulting executable
    #[arg(long)]
    run: bool,

    /// Keep the generated .h/.c files around instead of deleting them
    #[arg(long)]
    show_c: bool,

    /// The C compiler to invoke
    #[arg(long, default_value = "clang")]
    compiler: String,

    /// Output binary path (defaults to the input file stem)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

struct FsImportLoader {
    base_dir: PathBuf,
}

impl ImportLoader for FsImportLoader {
    fn load(&mut self, file: &str) -> Result<String, String> {
        let path = self.base_dir.join(file);
        fs::read_to_string(&path).map_err(|e| format!("{}: {e}", path.display()))
    }
}

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let source = fs::read_to_string(&cli.file).with_context(|| format!("reading {}", cli.file.display()))?;
    log::info!("compiling {}", cli.file.display());

    let path_display = cli.file.display().to_string();
    let program = dragon_parser::parse(&source).map_err(|e| render_and_exit(e.into_diagnostic(), &path_display, &source))?;

    let base_dir = cli.file.parent().map(Path::to_path_buf).unwrap_or_default();
    let mut loader: Box<dyn ImportLoader> = if base_dir.as_os_str().is_empty() { Box::new(NoImports) } else { Box::new(FsImportLoader { base_dir }) };
    let resolved =
        dragon_compiler::resolver::resolve_with_loader(program, loader.as_mut()).map_err(|e| render_and_exit(e.into_diagnostic(), &path_display, &source))?;

    let unit = dragon_compiler::generate(&resolved)?;

    let stem = cli.file.file_stem().and_then(|s| s.to_str()).unwrap_or("out").to_string();
    let out_dir = cli.file.parent().map(Path::to_path_buf).unwrap_or_default();
    let header_path = out_dir.join(format!("{stem}.h"));
    let source_path = out_dir.join(format!("{stem}.c"));
    let guard = format!("{}_H", stem.to_uppercase());

    fs::write(&header_path, unit.emit_header(&guard))?;
    fs::write(&source_path, unit.emit_source(&format!("{stem}.h")))?;
    log::info!("wrote {} and {}", header_path.display(), source_path.display());

    let exe_path = cli.output.unwrap_or_else(|| out_dir.join(&stem));
    let runtime_dir = runtime_search_dir();
    let status = Command::new(&cli.compiler)
        .args(["-O2", "-I"])
        .arg(&runtime_dir)
        .arg("-o")
        .arg(&exe_path)
        .arg(&source_path)
        .arg(runtime_dir.join("dragon.c"))
        .arg(runtime_dir.join("list.c"))
        .status()
        .with_context(|| format!("invoking {}", cli.compiler))?;

    if !status.success() {
        bail!("{} exited with {}", cli.compiler, status);
    }

    if cli.run {
        let run_status = Command::new(&exe_path).status().with_context(|| format!("running {}", exe_path.display()))?;
        if !cli.show_c {
            cleanup(&header_path, &source_path, &exe_path);
        }
        if !run_status.success() {
            std::process::exit(run_status.code().unwrap_or(1));
        }
    } else if !cli.show_c {
        let _ = fs::remove_file(&header_path);
        let _ = fs::remove_file(&source_path);
    }

    Ok(())
}

fn runtime_search_dir() -> PathBuf {
    let mut dir = std::env::current_exe().ok().and_then(|p| p.parent().map(Path::to_path_buf)).unwrap_or_default();
    dir.push("runtime");
    if dir.exists() {
        return dir;
    }
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../runtime")
}

fn cleanup(header: &Path, source: &Path, exe: &Path) {
    let _ = fs::remove_file(header);
    let _ = fs::remove_file(source);
    let _ = fs::remove_file(exe);
}

fn render_and_exit(diag: dragon_diagnostics::Diagnostic, path: &str, source: &str) -> anyhow::Error {
    anyhow::anyhow!("{}", diag.finish(path, source))
}

use clap::{Parser, Subcommand};
use log::info;
use rsfs::{AccessMode, FileSystem, FsError};
use std::sync::Arc;
use std::thread;

/// Drives an in-memory rsfs instance. Set RUST_LOG=debug to trace every operation.
#[derive(Parser, Debug)]
#[command(name = "rsfs-demo", version)]
struct Cli {
    /// Bytes per data block.
    #[arg(long, default_value_t = rsfs::DEFAULT_BLOCK_SIZE)]
    block_size: usize,
    /// Data blocks in the pool.
    #[arg(long, default_value_t = rsfs::DEFAULT_BLOCKS)]
    blocks: usize,
    /// Inodes, which bounds the number of files.
    #[arg(long, default_value_t = rsfs::DEFAULT_INODES)]
    inodes: usize,
    /// Direct block pointers per inode.
    #[arg(long, default_value_t = rsfs::DEFAULT_POINTERS)]
    pointers: usize,
    /// Descriptor slots.
    #[arg(long, default_value_t = rsfs::DEFAULT_OPEN_FILES)]
    open_files: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create, write, read back, close and delete one file.
    Basic,
    /// Hammer one file from reader and writer threads.
    Concurrent {
        #[arg(long, default_value_t = 4)]
        readers: usize,
        #[arg(long, default_value_t = 2)]
        writers: usize,
        #[arg(long, default_value_t = 20)]
        rounds: usize,
    },
    /// Append to a file until the pool or the pointer array runs out.
    Fill {
        #[arg(long, default_value = "big")]
        name: String,
        /// Bytes per append.
        #[arg(long, default_value_t = 10)]
        chunk: usize,
    },
}

fn basic(fs: &FileSystem) -> Result<(), FsError> {
    fs.create("a")?;
    let fd = fs.open("a", AccessMode::ReadWrite)?;
    fs.write(fd, b"hello")?;
    fs.fseek(fd, 0)?;

    let mut buf = [0; 5];
    let n = fs.read(fd, &mut buf)?;
    println!("read {} bytes: {}", n, String::from_utf8_lossy(&buf[..n]));
    print!("{}", fs.stat());

    fs.close(fd)?;
    fs.delete("a")?;
    match fs.open("a", AccessMode::ReadOnly) {
        Err(FsError::DoesNotExist) => println!("a is gone"),
        Err(e) => return Err(e),
        Ok(fd) => println!("a still opens as fd {}", fd),
    }
    Ok(())
}

fn concurrent(
    fs: Arc<FileSystem>,
    readers: usize,
    writers: usize,
    rounds: usize,
) -> Result<(), FsError> {
    fs.create("shared")?;

    let spawn = |id: usize, mode: AccessMode| {
        let fs = fs.clone();
        thread::spawn(move || -> Result<(), FsError> {
            for round in 0..rounds {
                let fd = fs.open("shared", mode)?;
                match mode {
                    AccessMode::ReadWrite => {
                        let line = format!("writer {} round {}\n", id, round);
                        fs.append(fd, line.as_bytes())?;
                    }
                    AccessMode::ReadOnly => {
                        let mut buf = [0; 64];
                        let n = fs.read(fd, &mut buf)?;
                        info!("reader {} saw {} bytes", id, n);
                    }
                }
                fs.close(fd)?;
            }
            Ok(())
        })
    };

    let handles: Vec<_> = (0..writers)
        .map(|id| spawn(id, AccessMode::ReadWrite))
        .chain((0..readers).map(|id| spawn(id, AccessMode::ReadOnly)))
        .collect();
    for handle in handles {
        match handle.join() {
            Ok(result) => result?,
            Err(_) => eprintln!("a worker thread panicked"),
        }
    }
    print!("{}", fs.stat());
    Ok(())
}

fn fill(fs: &FileSystem, name: &str, chunk: usize) -> Result<(), FsError> {
    fs.create(name)?;
    let fd = fs.open(name, AccessMode::ReadWrite)?;
    let data = vec![b'#'; chunk.max(1)];
    loop {
        let n = fs.append(fd, &data)?;
        if n < data.len() {
            println!("storage exhausted after a partial append of {} bytes", n);
            break;
        }
    }
    fs.close(fd)?;
    print!("{}", fs.stat());
    Ok(())
}

fn run(cli: Cli) -> Result<(), FsError> {
    let fs = FileSystem::builder()
        .with_block_size(cli.block_size)
        .with_blocks(cli.blocks)
        .with_inodes(cli.inodes)
        .with_pointers(cli.pointers)
        .with_open_files(cli.open_files)
        .build()?;

    match cli.command {
        Command::Basic => basic(&fs),
        Command::Concurrent {
            readers,
            writers,
            rounds,
        } => concurrent(Arc::new(fs), readers, writers, rounds),
        Command::Fill { name, chunk } => fill(&fs, &name, chunk),
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("rsfs-demo: {} (status {})", e, e.code());
        std::process::exit(1);
    }
}

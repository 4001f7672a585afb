use rsfs::{AccessMode, FileSystem};

pub fn main() {
    // create a file on a fresh file system, write to it and read it back
    let fs = FileSystem::new();
    fs.create("hello").expect("should create");
    let fd = fs.open("hello", AccessMode::ReadWrite).unwrap();
    fs.write(fd, b"hello, world").unwrap();
    fs.fseek(fd, 0).unwrap();

    let mut buf = [0; 12];
    let n = fs.read(fd, &mut buf).unwrap();
    println!("{}", String::from_utf8_lossy(&buf[..n]));
    fs.close(fd).unwrap();
    print!("{}", fs.stat());
}

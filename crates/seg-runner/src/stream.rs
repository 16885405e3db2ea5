use std::io::{self, BufRead, BufReader, Write};
use std::process::{Child, Command, ExitStatus, Stdio};

/// Runs `command` with stdout and stderr merged into one pipe and tees every
/// line as it arrives: verbatim into `log` (flushed per line) and into
/// `console` prefixed with `[label] `. Returns the child's exit status once
/// the stream has closed.
pub fn stream_command<L, C>(
    mut command: Command,
    label: &str,
    log: &mut L,
    console: &mut C,
) -> io::Result<ExitStatus>
where
    L: Write,
    C: Write,
{
    let (reader, writer) = io::pipe()?;
    let writer_err = writer.try_clone()?;
    command
        .stdin(Stdio::null())
        .stdout(writer)
        .stderr(writer_err);
    let mut child = command.spawn()?;
    // The command keeps its copies of the write end alive; EOF only shows up
    // once every write end is closed.
    drop(command);

    if let Err(err) = pump_lines(BufReader::new(reader), label, log, console) {
        reap(&mut child);
        return Err(err);
    }
    child.wait()
}

fn pump_lines<R, L, C>(mut reader: R, label: &str, log: &mut L, console: &mut C) -> io::Result<()>
where
    R: BufRead,
    L: Write,
    C: Write,
{
    let prefix = format!("[{}] ", label);
    let mut line = Vec::new();
    let mut echo = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => return Ok(()),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }

        log.write_all(&line)?;
        log.flush()?;

        // One write per line keeps lines from parallel tasks whole on stdout.
        echo.clear();
        echo.extend_from_slice(prefix.as_bytes());
        echo.extend_from_slice(&line);
        if !line.ends_with(b"\n") {
            echo.push(b'\n');
        }
        console.write_all(&echo)?;
        console.flush()?;
    }
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

use std::process::ExitStatus;

use assert_cmd::Command;

fn run_command(args: Vec<&str>) -> (Vec<u8>, ExitStatus) {
    let mut cmd = Command::cargo_bin("ipsec-exporter").unwrap();
    for arg in args {
        cmd.arg(arg);
    }

    let output = cmd.output().expect("Failed to execute process");

    (output.stdout, output.status)
}

fn assert_no_log_lines(output: Vec<u8>) {
    let output = String::from_utf8(output).expect("Output is not a valid utf8 string");

    // Assert there are no lines with keywords
    let keywords = ["ERROR", "WARN", "INFO", "DEBUG", "TRACE"];
    for line in output.lines() {
        let present = keywords.iter().any(|word| line.contains(word));
        assert!(!present, "Log detected in output line: {:?}", line);
    }
}

#[test]
fn version() {
    let (output, status) = run_command(vec!["--version"]);
    assert!(status.success());

    let output = String::from_utf8(output).unwrap();
    assert_eq!(
        output.trim(),
        format!("ipsec-exporter {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn clean_output() {
    let tests = vec![
        (vec!["-v"], true),
        (vec!["--help"], true),
        (vec!["--something-not-exist"], false),
        (vec!["--port", "not-a-port"], false),
    ];

    for (args, want) in tests {
        let (output, status) = run_command(args.clone());
        assert_no_log_lines(output);
        assert_eq!(status.success(), want, "args: {:?}", args)
    }
}

#[test]
fn startup_failures() {
    let tests = vec![
        // interval below the minimum
        (vec!["--interval", "1"], exitcode::CONFIG),
        (vec!["--timeout", "0"], exitcode::CONFIG),
        (vec!["--address", "localhost"], exitcode::CONFIG),
        // ipsec is not there
        (
            vec!["--no-sudo", "--ipsec", "/nonexistent/ipsec"],
            exitcode::OSFILE,
        ),
    ];

    for (args, want) in tests {
        let (_output, status) = run_command(args.clone());
        assert_eq!(status.code(), Some(want), "args: {:?}", args);
    }
}

#[cfg(unix)]
#[test]
fn port_in_use() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port().to_string();

    let (_output, status) = run_command(vec![
        "--no-sudo",
        "--ipsec",
        "/bin/sh",
        "--address",
        "127.0.0.1",
        "--port",
        &port,
    ]);
    assert_eq!(status.code(), Some(exitcode::OSERR));
}

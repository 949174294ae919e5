/// Demultiplexes a container runtime's combined log stream into
/// stdout/stderr using the 8-byte frame header `[stream:1][reserved:3]
/// [size:4 big-endian][payload:size]`. `stream` 1 is stdout, 2 is
/// stderr; any other value is skipped by discarding `size` bytes so a
/// single unrecognized frame doesn't desynchronize the rest of the
/// stream.
pub fn demux(raw: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut offset = 0;

    while offset + 8 <= raw.len() {
        let stream = raw[offset];
        let size = u32::from_be_bytes([raw[offset + 4], raw[offset + 5], raw[offset + 6], raw[offset + 7]]) as usize;
        offset += 8;

        if offset + size > raw.len() {
            break;
        }
        let payload = &raw[offset..offset + size];
        match stream {
            1 => stdout.extend_from_slice(payload),
            2 => stderr.extend_from_slice(payload),
            _ => {}
        }
        offset += size;
    }

    (stdout, stderr)
}

/// Frames a single stream's payload the way the container runtime would,
/// chiefly for constructing test fixtures.
pub fn frame(stream: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len());
    out.push(stream);
    out.extend_from_slice(&[0, 0, 0]);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demultiplexes_interleaved_stdout_and_stderr() {
        let mut raw = Vec::new();
        raw.extend(frame(1, b"hello "));
        raw.extend(frame(2, b"warn "));
        raw.extend(frame(1, b"world"));
        raw.extend(frame(2, b"ing"));

        let (stdout, stderr) = demux(&raw);
        assert_eq!(stdout, b"hello world");
        assert_eq!(stderr, b"warning");
    }

    #[test]
    fn skips_unknown_stream_type_without_desyncing() {
        let mut raw = Vec::new();
        raw.extend(frame(3, b"ignored"));
        raw.extend(frame(1, b"kept"));

        let (stdout, stderr) = demux(&raw);
        assert_eq!(stdout, b"kept");
        assert!(stderr.is_empty());
    }

    #[test]
    fn truncated_trailing_frame_is_discarded_not_panicking() {
        let mut raw = frame(1, b"ok");
        raw.extend_from_slice(&[1, 0, 0, 0, 0, 0, 0, 10]); // header claims 10 bytes, none present
        let (stdout, _stderr) = demux(&raw);
        assert_eq!(stdout, b"ok");
    }

    #[test]
    fn empty_stream_demultiplexes_to_empty_output() {
        let (stdout, stderr) = demux(&[]);
        assert!(stdout.is_empty() && stderr.is_empty());
    }

    #[test]
    fn round_trip_is_a_bijection_per_stream() {
        let stdout_in: &[u8] = b"line one\nline two\n";
        let stderr_in: &[u8] = b"oops\n";
        let mut raw = Vec::new();
        raw.extend(frame(1, stdout_in));
        raw.extend(frame(2, stderr_in));

        let (stdout, stderr) = demux(&raw);
        assert_eq!(stdout, stdout_in);
        assert_eq!(stderr, stderr_in);
    }
}

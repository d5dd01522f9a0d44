fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use exfs_protocol::{Chunk, ChunkHeader, ChunkResult, FileMeta, decode_frame};

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn read_fixture(name: &str) -> String {
        let path = fixtures_dir().join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        serde_json::from_str(&read_fixture(name))
            .unwrap_or_else(|e| panic!("failed to parse fixture {name}: {e}"))
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares
    /// the JSON values (order-independent).
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  rust:    {reserialized}"
        );
        parsed
    }

    // --- Descriptor ---

    #[test]
    fn fixture_file_meta() {
        let meta: FileMeta = roundtrip_test("file_meta.json");
        assert_eq!(meta.id, "f-1");
        assert_eq!(meta.total_chunks, 3);
        assert_eq!(meta.owner_id.as_deref(), Some("42"));
        assert_eq!(meta.extra.name.as_deref(), Some("clip.mp4"));
        meta.validate().unwrap();
    }

    #[test]
    fn fixture_file_meta_legacy_keys() {
        let meta: FileMeta = serde_json::from_value(load_fixture("file_meta_legacy.json")).unwrap();
        assert_eq!(meta.id, "f-2");
        assert_eq!(meta.destination_path, "notes.txt");
        assert_eq!(meta.owner_id.as_deref(), Some("7"));
        assert!(meta.overwrite);
        assert!(!meta.chunked);
        assert_eq!(meta.extra, Default::default());

        // Written back in the current form.
        let out = serde_json::to_value(&meta).unwrap();
        assert_eq!(out["destinationPath"], "notes.txt");
        assert_eq!(out["ownerId"], "7");
        assert_eq!(out["fileId"], "f-2");
        assert!(out.get("saveAs").is_none());
    }

    // --- Chunk frames ---

    #[test]
    fn fixture_chunk_header() {
        let header: ChunkHeader = roundtrip_test("chunk_header.json");
        assert_eq!(header.transfer_id, "f-1");
        assert_eq!(header.index, 2);
    }

    #[test]
    fn fixture_chunk_header_legacy_keys() {
        let header: ChunkHeader =
            serde_json::from_value(load_fixture("chunk_header_legacy.json")).unwrap();
        assert_eq!(header.transfer_id, "f-1");
        assert_eq!(header.sender_id.as_deref(), Some("42"));
        assert!(header.checksum.is_none());
    }

    #[test]
    fn frame_from_fixture_header() {
        let mut frame = read_fixture("chunk_header.json").into_bytes();
        frame.push(0);
        frame.extend_from_slice(b"abc");

        let (header, payload) = decode_frame(&frame).unwrap();
        assert_eq!(header.index, 2);
        assert_eq!(payload, b"abc");

        // The fixture checksum is the SHA-256 of "abc".
        let chunk = Chunk::from_frame(&frame).unwrap();
        let meta = FileMeta::chunked("f-1", "videos/clip.mp4", 11, 4);
        chunk.validate(&meta).unwrap();
    }

    // --- Acknowledgements ---

    #[test]
    fn fixture_chunk_result() {
        let ack: ChunkResult = roundtrip_test("chunk_result.json");
        assert!(!ack.completed);

        let done: ChunkResult = roundtrip_test("chunk_result_completed.json");
        assert!(done.completed);
        assert!(done.chunk_size.is_none());
    }
}

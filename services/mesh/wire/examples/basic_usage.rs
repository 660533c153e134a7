//! Basic usage example for the mesh wire formats.

use bytes::Bytes;
use mesh_wire::{
    decode_advert, decode_frame, encode_advert, encode_frame, LocatorRecord, MessageHeader, Path,
    DISCOVERY_PROTOCOL_ID,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Mesh Wire Example ===\n");

    // 1. Build a message for the node two hops away: out port 3, then port 7
    println!("1. Building a source-routed message...");
    let target = Path::from_hops(&[3, 7])?;
    let message = MessageHeader::new(target, Path::local())
        .encode_with_protocol(0x0101, b"Hello, mesh network!");
    println!("   Message: {} bytes, target {}", message.len(), Path::from_hops(&[3, 7])?);

    // 2. Frame it for a byte stream
    println!("\n2. Framing for a byte stream...");
    let frame = encode_frame(&message);
    println!("   Frame size: {} bytes", frame.len());

    let decoded = decode_frame(&frame[1..frame.len() - 1]).ok_or("frame rejected")?;
    assert_eq!(decoded, message);
    println!("   ✓ Frame round trip OK");

    // 3. A corrupted frame is dropped
    let mut corrupted = frame.to_vec();
    corrupted[5] ^= 0x01;
    let inner = &corrupted[1..corrupted.len() - 1];
    println!(
        "   Corrupted frame accepted: {}",
        decode_frame(inner).is_some()
    );

    // 4. Parse the header the way the first hop would
    println!("\n3. Parsing the header...");
    let (header, body) = MessageHeader::parse(&decoded)?;
    println!(
        "   Next port: {}, return path {}, body {} bytes",
        header.target.first(),
        header.return_path,
        body.len()
    );

    // 5. Discovery advert with one locator
    println!("\n4. Encoding a discovery advert...");
    let record = LocatorRecord::new(
        DISCOVERY_PROTOCOL_ID,
        1_700_000_000_000,
        Path::local(),
        Bytes::from_static(&[192, 168, 1, 10]),
    );
    let advert = encode_advert([&record]);
    let records = decode_advert(&advert);
    println!("   Advert: {} bytes, {} record(s)", advert.len(), records.len());
    assert_eq!(records, vec![record]);

    println!("\n=== Example completed successfully! ===");
    Ok(())
}

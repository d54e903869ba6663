use string_cache::DefaultAtom as Atom;

// Aliases:
//   Point:
//     Graphite: datapoint
//     ClickHouse: row of the points table

/// A single datapoint as it arrives on the wire.
#[derive(Clone, Debug, PartialEq)]
pub struct Point {
    pub name: Atom,
    pub value: f64,
    /// Seconds since the Unix epoch, as sent by the client.
    pub timestamp: u32,
}

impl Point {
    pub fn new<N: Into<Atom>>(name: N, value: f64, timestamp: u32) -> Point {
        Point {
            name: name.into(),
            value,
            timestamp,
        }
    }
}

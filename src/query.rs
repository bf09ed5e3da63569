/// One tracked point as handed to the model on its first invocation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QueryPoint {
    pub point_index: usize,
    /// Index into the seeded batch of the frame the coordinate refers to.
    /// Always 0: the oldest frame the window still holds when the seed is
    /// delivered, which is the registration frame unless failed invocations
    /// let the window slide past it.
    pub frame_offset: usize,
    pub x: f64,
    pub y: f64,
}

/// The points registered for a session. Built once by `reset` and never
/// modified afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct QuerySeed {
    points: Vec<QueryPoint>,
}

impl QuerySeed {
    /// Tag every coordinate with the registration frame (offset 0)
    pub fn from_coordinates(coordinates: &[[f64; 2]]) -> Self {
        let points = coordinates
            .iter()
            .enumerate()
            .map(|(point_index, &[x, y])| QueryPoint {
                point_index,
                frame_offset: 0,
                x,
                y,
            })
            .collect();
        Self { points }
    }

    pub fn points(&self) -> &[QueryPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

use image::GrayImage;

/// Axis-aligned rectangle as reported by a rectangle classifier,
/// in pixel coordinates of the scanned image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }
}

/// A detected or enrolled face: a rectangle in image coordinates, an
/// identity, and an optional owned crop of the face pixels.
///
/// Coordinates are top-left `(x1, y1)` / bottom-right `(x2, y2)` with
/// `x2 >= x1` and `y2 >= y1`. The identity is [`Face::UNKNOWN_ID`] until
/// recognition or enrollment assigns one.
#[derive(Debug, Clone, Default)]
pub struct Face {
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
    id: i32,
    face: Option<GrayImage>,
}

impl Face {
    /// Sentinel identity for an unknown / not-yet-enrolled face.
    pub const UNKNOWN_ID: i32 = -1;

    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            id: Self::UNKNOWN_ID,
            face: None,
        }
    }

    /// Build a face record with a known identity and no rectangle,
    /// e.g. for enrolling a pre-cropped image.
    pub fn with_id(id: i32) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn x1(&self) -> i32 {
        self.x1
    }

    pub fn y1(&self) -> i32 {
        self.y1
    }

    pub fn x2(&self) -> i32 {
        self.x2
    }

    pub fn y2(&self) -> i32 {
        self.y2
    }

    pub fn width(&self) -> u32 {
        (self.x2 - self.x1).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.y2 - self.y1).max(0) as u32
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.x1 + self.x2) as f64 / 2.0,
            (self.y1 + self.y2) as f64 / 2.0,
        )
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn set_id(&mut self, id: i32) {
        self.id = id;
    }

    pub fn face_image(&self) -> Option<&GrayImage> {
        self.face.as_ref()
    }

    pub fn set_face_image(&mut self, image: GrayImage) {
        self.face = Some(image);
    }

    pub fn take_face_image(&mut self) -> Option<GrayImage> {
        self.face.take()
    }

    pub fn set_rect(&mut self, x1: i32, y1: i32, x2: i32, y2: i32) {
        self.x1 = x1;
        self.y1 = y1;
        self.x2 = x2;
        self.y2 = y2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_face_dimensions() {
        let face = Face::new(10, 20, 110, 140);
        assert_eq!(face.width(), 100);
        assert_eq!(face.height(), 120);
        assert_eq!(face.center(), (60.0, 80.0));
        assert_eq!(face.id(), Face::UNKNOWN_ID);
    }

    #[test]
    fn test_degenerate_rect_clamps_to_zero() {
        let face = Face::new(50, 50, 40, 40);
        assert_eq!(face.width(), 0);
        assert_eq!(face.height(), 0);
    }

    #[test]
    fn test_face_image_ownership() {
        let mut face = Face::new(0, 0, 4, 4);
        assert!(face.face_image().is_none());
        face.set_face_image(GrayImage::new(4, 4));
        assert!(face.face_image().is_some());
        let taken = face.take_face_image();
        assert!(taken.is_some());
        assert!(face.face_image().is_none());
    }

    #[test]
    fn test_rect_center() {
        let rect = Rect {
            x: 10,
            y: 10,
            width: 20,
            height: 40,
        };
        assert_eq!(rect.center(), (20.0, 30.0));
    }
}

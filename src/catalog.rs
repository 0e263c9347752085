use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};

const COCO_CLASSES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

const PALETTE: [[u8; 3]; 20] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [146, 204, 23],
    [61, 219, 134],
    [26, 147, 52],
    [0, 212, 187],
    [44, 153, 168],
    [0, 194, 255],
    [52, 69, 147],
    [100, 115, 255],
    [0, 24, 236],
    [132, 56, 255],
    [82, 0, 133],
    [203, 56, 255],
    [255, 149, 200],
    [255, 55, 199],
];

#[derive(Debug, Clone, PartialEq)]
pub struct ClassEntry {
    pub name: String,
    pub color: [u8; 3],
}

/// Class id to name mapping, in definition order. Never mutated once built.
#[derive(Debug, Clone)]
pub struct ClassCatalog {
    entries: Vec<ClassEntry>,
}

impl ClassCatalog {
    pub fn coco() -> Self {
        let entries = COCO_CLASSES
            .iter()
            .enumerate()
            .map(|(i, name)| ClassEntry {
                name: name.to_string(),
                color: PALETTE[i % PALETTE.len()],
            })
            .collect();
        Self { entries }
    }

    pub fn from_entries(entries: Vec<ClassEntry>) -> Self {
        Self { entries }
    }

    pub fn from_file(path: &Path) -> io::Result<Self> {
        let entries = load_labels(path)?;
        if entries.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("labels file {:?} is empty", path),
            ));
        }
        Ok(Self { entries })
    }

    pub fn get(&self, class_id: usize) -> Option<&ClassEntry> {
        self.entries.get(class_id)
    }

    pub fn name(&self, class_id: usize) -> Option<&str> {
        self.get(class_id).map(|entry| entry.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClassEntry> {
        self.entries.iter()
    }
}

/// Reads a `label,red,green,blue` file, one class per line. A line holding only
/// a label gets a palette colour.
pub fn load_labels(filepath: &Path) -> io::Result<Vec<ClassEntry>> {
    let file = File::open(filepath)?;
    let reader = io::BufReader::new(file);
    let mut entries = Vec::new();

    for line_result in reader.lines() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split(',').collect();

        let color = match parts.len() {
            1 => PALETTE[entries.len() % PALETTE.len()],
            4 => [
                parse_channel(parts[1], "red")?,
                parse_channel(parts[2], "green")?,
                parse_channel(parts[3], "blue")?,
            ],
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Invalid line format: {}", line),
                ))
            }
        };

        entries.push(ClassEntry {
            name: parts[0].trim().to_string(),
            color,
        });
    }

    Ok(entries)
}

fn parse_channel(value: &str, channel: &str) -> io::Result<u8> {
    value.trim().parse().map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Invalid {} value: {}", channel, value.trim()),
        )
    })
}

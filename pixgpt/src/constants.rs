/// Side length of a CIFAR-10 image
pub const IMAGE_SIDE: usize = 32;

/// Number of color channels (RGB)
pub const CHANNELS: usize = 3;

/// Number of pixels in a CIFAR-10 image
pub const N_PIXELS: usize = IMAGE_SIDE * IMAGE_SIDE;

/// Bytes per CIFAR-10 binary record: one label byte followed by the R, G and B planes
pub const CIFAR_RECORD_LEN: usize = 1 + CHANNELS * N_PIXELS;

pub const CIFAR_TRAIN_BATCHES: [&str; 5] = [
    "data_batch_1.bin",
    "data_batch_2.bin",
    "data_batch_3.bin",
    "data_batch_4.bin",
    "data_batch_5.bin",
];

pub const CIFAR_TEST_BATCHES: [&str; 1] = ["test_batch.bin"];

/// Standard deviation of the normal parameter initialization
pub const INIT_STD: f32 = 0.02;

/// Lower bound of the cosine learning rate multiplier
pub const MIN_LR_MULT: f32 = 0.1;

// Copyright (c) esphome-native-api-rs contributors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The ESPHome Native API message catalog, expressed as a compile-time
//! enum-to-message map instead of string-keyed reflection: each message is
//! a plain struct implementing [`ApiMessage`], looked up by its numeric
//! wire type.

pub mod entities;
pub mod messages;
pub mod proto;

pub use messages::{message_type, ApiMessage};
